use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{queries, DbPool, LocationStore, RecordOutcome};
use crate::models::booking::{BookingLocation, BookingLocationRow};
use crate::models::location_sample::LocationSample;
use crate::models::session::BookingId;

pub struct PgLocationStore {
    pool: DbPool,
}

impl PgLocationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocationStore for PgLocationStore {
    async fn record_sample(&self, sample: &LocationSample) -> Result<RecordOutcome> {
        let timestamp = sample.timestamp.naive_utc();

        // Sample append and pointer move commit together.
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(queries::INSERT_LOCATION_SAMPLE)
            .bind(sample.booking_id)
            .bind(sample.latitude)
            .bind(sample.longitude)
            .bind(sample.speed)
            .bind(sample.heading)
            .bind(timestamp)
            .bind(sample.status.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to insert location sample")?;

        let updated = sqlx::query(queries::UPDATE_BOOKING_POINTER)
            .bind(sample.booking_id)
            .bind(sample.latitude)
            .bind(sample.longitude)
            .bind(timestamp)
            .execute(&mut *tx)
            .await
            .context("Failed to update booking location")?;

        tx.commit().await.context("Failed to commit location sample")?;

        debug!(
            "Stored sample for booking {} (pointer rows: {})",
            sample.booking_id,
            updated.rows_affected()
        );

        Ok(RecordOutcome {
            pointer_updated: updated.rows_affected() > 0,
        })
    }

    async fn last_known_location(&self, booking_id: BookingId) -> Result<Option<BookingLocation>> {
        let row: Option<BookingLocationRow> = sqlx::query_as(queries::SELECT_BOOKING_LOCATION)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load booking location")?;

        Ok(row.and_then(BookingLocationRow::into_location))
    }
}
