use chrono::Utc;
use tracing::{error, warn};

use crate::models::location_sample::{LocationReport, LocationSample};
use crate::state::AppState;

/// Message sent back to a driver whose fix could not be stored.
pub const PERSISTENCE_FAILED: &str = "Failed to record location update";

/// Stamp, persist and fan out one validated location report.
///
/// Persistence failures are returned to the caller and the sample is dropped;
/// nothing is retried here.
pub async fn ingest_location(state: &AppState, report: LocationReport) -> anyhow::Result<LocationSample> {
    let sample = LocationSample::accepted(report, Utc::now());

    let outcome = match state.store.record_sample(&sample).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(
                "Failed to persist location for booking {}: {:#}",
                sample.booking_id, e
            );
            return Err(e);
        }
    };

    if !outcome.pointer_updated {
        warn!(
            "Booking {} location pointer not updated (no such booking or newer fix stored)",
            sample.booking_id
        );
    }

    state.broadcaster.broadcast(&sample);
    Ok(sample)
}
