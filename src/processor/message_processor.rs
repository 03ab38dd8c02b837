use tracing::{debug, info, warn};

use crate::models::message::{parse_client_message, ClientMessage, ServerMessage};
use crate::models::session::{BookingId, ConnectionId, Identity};
use crate::processor::location_ingest::{ingest_location, PERSISTENCE_FAILED};
use crate::state::AppState;

/// Handle one inbound text frame from `connection_id` and return the replies for
/// that connection, in order. Protocol errors become `error` replies; they never
/// close the connection.
pub async fn process_message(
    state: &AppState,
    connection_id: ConnectionId,
    payload: &str,
) -> Vec<ServerMessage> {
    // 1. Parse and validate
    let message = match parse_client_message(payload) {
        Ok(m) => m,
        Err(e) => {
            warn!("Rejected message from connection {}: {}", connection_id, e);
            return vec![ServerMessage::error(e)];
        }
    };

    // 2. Dispatch on type
    match message {
        ClientMessage::Init { user_id, role } => {
            match state
                .registry
                .set_identity(connection_id, Identity { user_id, role })
            {
                Ok(_) => vec![ServerMessage::InitSuccess],
                Err(e) => {
                    warn!("init rejected for connection {}: {}", connection_id, e);
                    vec![ServerMessage::error(e)]
                }
            }
        }
        ClientMessage::SubscribeTracking { booking_id } => {
            match state.registry.set_subscription(connection_id, booking_id) {
                Ok(_) => {
                    let mut replies = vec![ServerMessage::SubscribeSuccess { booking_id }];
                    if let Some(snapshot) = last_known_location(state, booking_id).await {
                        replies.push(snapshot);
                    }
                    replies
                }
                Err(e) => {
                    warn!(
                        "subscribe_tracking rejected for connection {}: {}",
                        connection_id, e
                    );
                    vec![ServerMessage::error(e)]
                }
            }
        }
        ClientMessage::LocationUpdate(report) => {
            debug!(
                "Location from connection {} for booking {}: ({}, {})",
                connection_id, report.booking_id, report.latitude, report.longitude
            );
            match ingest_location(state, report).await {
                Ok(_) => Vec::new(),
                Err(_) => vec![ServerMessage::error(PERSISTENCE_FAILED)],
            }
        }
        ClientMessage::Ping => vec![ServerMessage::Pong],
    }
}

async fn last_known_location(state: &AppState, booking_id: BookingId) -> Option<ServerMessage> {
    match state.store.last_known_location(booking_id).await {
        Ok(Some(location)) => Some(ServerMessage::LastKnownLocation { data: location }),
        Ok(None) => None,
        Err(e) => {
            info!(
                "Could not load last known location for booking {}: {:#}",
                booking_id, e
            );
            None
        }
    }
}
