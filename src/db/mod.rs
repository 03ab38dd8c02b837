use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

use crate::models::booking::BookingLocation;
use crate::models::location_sample::LocationSample;
use crate::models::session::BookingId;

pub mod memory;
pub mod postgres;
pub mod queries;

pub use memory::MemoryLocationStore;
pub use postgres::PgLocationStore;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Result of persisting one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    /// False when no booking row matched, or the stored pointer is newer.
    pub pointer_updated: bool,
}

/// Durable storage for location samples and the booking location pointer.
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Append `sample` to the history and move the booking pointer to it.
    async fn record_sample(&self, sample: &LocationSample) -> Result<RecordOutcome>;

    async fn last_known_location(&self, booking_id: BookingId) -> Result<Option<BookingLocation>>;
}
