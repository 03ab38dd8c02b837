use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::session::BookingId;

/// Last-known-location projection stored on the booking row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingLocation {
    pub booking_id: BookingId,
    pub last_known_latitude: f64,
    pub last_known_longitude: f64,
    pub last_location_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_arrival_time: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
pub struct BookingLocationRow {
    pub booking_id: BookingId,
    pub last_known_latitude: Option<f64>,
    pub last_known_longitude: Option<f64>,
    pub last_location_update: Option<NaiveDateTime>, // DDL says timestamp without tz
    pub estimated_arrival_time: Option<NaiveDateTime>,
}

impl BookingLocationRow {
    /// `None` until the booking has received its first sample.
    pub fn into_location(self) -> Option<BookingLocation> {
        Some(BookingLocation {
            booking_id: self.booking_id,
            last_known_latitude: self.last_known_latitude?,
            last_known_longitude: self.last_known_longitude?,
            last_location_update: self.last_location_update?.and_utc(),
            estimated_arrival_time: self.estimated_arrival_time.map(|t| t.and_utc()),
        })
    }
}
