use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

use crate::models::location_sample::LocationSample;
use crate::models::message::ServerMessage;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Pushes accepted samples to every connection subscribed to the sample's booking.
///
/// Delivery is best-effort: a closed subscriber is logged and skipped. The sender
/// is not excluded, so a driver subscribed to its own booking sees its own fixes.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn broadcast(&self, sample: &LocationSample) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        let payload = match serde_json::to_string(&ServerMessage::LocationUpdate {
            data: sample.clone(),
        }) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize location update: {}", e);
                return report;
            }
        };

        for subscriber in self.registry.find_subscribers(sample.booking_id) {
            match subscriber.outbox.send(Message::Text(payload.clone())) {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    warn!(
                        "Failed to deliver location update for booking {} to connection {}",
                        sample.booking_id, subscriber.connection_id
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Broadcast booking {}: {} delivered, {} failed",
            sample.booking_id, report.delivered, report.failed
        );
        report
    }
}
