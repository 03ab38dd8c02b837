use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::BookingId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    Active,
    Inactive,
}

impl SampleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleStatus::Active => "active",
            SampleStatus::Inactive => "inactive",
        }
    }
}

/// A validated position report, before the server stamps it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    pub booking_id: BookingId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

/// One row of `location_tracking`. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub booking_id: BookingId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub status: SampleStatus,
}

impl LocationSample {
    pub fn accepted(report: LocationReport, timestamp: DateTime<Utc>) -> Self {
        Self {
            booking_id: report.booking_id,
            latitude: report.latitude,
            longitude: report.longitude,
            speed: report.speed,
            heading: report.heading,
            timestamp,
            status: SampleStatus::Active,
        }
    }
}
