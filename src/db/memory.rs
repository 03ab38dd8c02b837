use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{LocationStore, RecordOutcome};
use crate::models::booking::BookingLocation;
use crate::models::location_sample::LocationSample;
use crate::models::session::BookingId;

#[derive(Debug, Default, Clone)]
struct BookingRow {
    last_known_latitude: Option<f64>,
    last_known_longitude: Option<f64>,
    last_location_update: Option<DateTime<Utc>>,
    estimated_arrival_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Tables {
    samples: Vec<LocationSample>,
    bookings: HashMap<BookingId, BookingRow>,
}

/// In-process store with the same semantics as the PostgreSQL one. Used for local
/// runs without a database and in tests.
#[derive(Debug, Default)]
pub struct MemoryLocationStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_booking(&self, booking_id: BookingId) {
        self.tables
            .lock()
            .await
            .bookings
            .entry(booking_id)
            .or_default();
    }

    pub async fn set_estimated_arrival(&self, booking_id: BookingId, eta: DateTime<Utc>) {
        if let Some(row) = self.tables.lock().await.bookings.get_mut(&booking_id) {
            row.estimated_arrival_time = Some(eta);
        }
    }

    /// Make every subsequent write fail, as if the database were unreachable.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn samples(&self) -> Vec<LocationSample> {
        self.tables.lock().await.samples.clone()
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn record_sample(&self, sample: &LocationSample) -> Result<RecordOutcome> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("database unavailable");
        }

        let mut tables = self.tables.lock().await;
        tables.samples.push(sample.clone());

        let pointer_updated = match tables.bookings.get_mut(&sample.booking_id) {
            Some(row) if row.last_location_update.map_or(true, |t| t <= sample.timestamp) => {
                row.last_known_latitude = Some(sample.latitude);
                row.last_known_longitude = Some(sample.longitude);
                row.last_location_update = Some(sample.timestamp);
                true
            }
            _ => false,
        };

        Ok(RecordOutcome { pointer_updated })
    }

    async fn last_known_location(&self, booking_id: BookingId) -> Result<Option<BookingLocation>> {
        let tables = self.tables.lock().await;
        let Some(row) = tables.bookings.get(&booking_id) else {
            return Ok(None);
        };

        Ok(match (row.last_known_latitude, row.last_known_longitude, row.last_location_update) {
            (Some(lat), Some(lng), Some(at)) => Some(BookingLocation {
                booking_id,
                last_known_latitude: lat,
                last_known_longitude: lng,
                last_location_update: at,
                estimated_arrival_time: row.estimated_arrival_time,
            }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::location_sample::{LocationReport, SampleStatus};
    use chrono::Duration;

    fn sample(booking_id: BookingId, lat: f64, lng: f64, at: DateTime<Utc>) -> LocationSample {
        LocationSample::accepted(
            LocationReport {
                booking_id,
                latitude: lat,
                longitude: lng,
                speed: None,
                heading: None,
            },
            at,
        )
    }

    #[tokio::test]
    async fn test_pointer_tracks_newest_sample() {
        let store = MemoryLocationStore::new();
        store.insert_booking(42).await;
        let t0 = Utc::now();

        let first = store.record_sample(&sample(42, 29.76, -95.37, t0)).await.unwrap();
        let second = store
            .record_sample(&sample(42, 29.77, -95.36, t0 + Duration::seconds(5)))
            .await
            .unwrap();
        // Arrives late with an older timestamp: logged, not applied to the pointer.
        let stale = store
            .record_sample(&sample(42, 1.0, 1.0, t0 + Duration::seconds(2)))
            .await
            .unwrap();

        assert!(first.pointer_updated);
        assert!(second.pointer_updated);
        assert!(!stale.pointer_updated);

        let pointer = store.last_known_location(42).await.unwrap().unwrap();
        assert_eq!(pointer.last_known_latitude, 29.77);
        assert_eq!(pointer.last_known_longitude, -95.36);
        assert_eq!(pointer.last_location_update, t0 + Duration::seconds(5));

        let samples = store.samples().await;
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.status == SampleStatus::Active));
    }

    #[tokio::test]
    async fn test_unknown_booking_still_appends() {
        let store = MemoryLocationStore::new();
        let outcome = store.record_sample(&sample(99, 1.0, 2.0, Utc::now())).await.unwrap();

        assert!(!outcome.pointer_updated);
        assert_eq!(store.samples().await.len(), 1);
        assert!(store.last_known_location(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_writes_store_nothing() {
        let store = MemoryLocationStore::new();
        store.insert_booking(1).await;
        store.set_fail_writes(true);

        assert!(store.record_sample(&sample(1, 1.0, 2.0, Utc::now())).await.is_err());
        assert!(store.samples().await.is_empty());
        assert!(store.last_known_location(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pointer_carries_eta() {
        let store = MemoryLocationStore::new();
        store.insert_booking(5).await;
        let eta = Utc::now() + Duration::minutes(12);
        store.set_estimated_arrival(5, eta).await;

        store.record_sample(&sample(5, 10.0, 20.0, Utc::now())).await.unwrap();
        let pointer = store.last_known_location(5).await.unwrap().unwrap();
        assert_eq!(pointer.estimated_arrival_time, Some(eta));
    }
}
