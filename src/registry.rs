//! Connection registry: maps each live socket to its session state and outbound channel.
//!
//! Entries are only touched through the methods below. Every mutation happens under
//! the DashMap shard lock for that entry, so `register`/`unregister`/`find_subscribers`
//! can run from any task.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::error::ProtocolError;
use crate::models::session::{BookingId, ConnectionId, Identity};
use crate::session::SessionState;

/// Sender half feeding a connection's socket writer task.
pub type Outbox = mpsc::UnboundedSender<Message>;

#[derive(Debug)]
struct ConnectionEntry {
    state: SessionState,
    outbox: Outbox,
}

/// A connection currently subscribed to some booking.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub connection_id: ConnectionId,
    pub outbox: Outbox,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection with no identity and no subscription.
    pub fn register(&self, connection_id: ConnectionId, outbox: Outbox) {
        self.connections.insert(
            connection_id,
            ConnectionEntry {
                state: SessionState::Connected,
                outbox,
            },
        );
        debug!("Registered connection {} ({} live)", connection_id, self.len());
    }

    /// Register and return a guard that unregisters when dropped, so every exit
    /// path of a connection task releases its entry.
    pub fn register_scoped(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        outbox: Outbox,
    ) -> Registration {
        self.register(connection_id, outbox);
        Registration {
            registry: Arc::clone(self),
            connection_id,
        }
    }

    pub fn set_identity(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
    ) -> Result<SessionState, ProtocolError> {
        let mut entry = self
            .connections
            .get_mut(&connection_id)
            .ok_or(ProtocolError::UnknownConnection)?;
        entry.state = entry.state.identify(identity)?;
        info!(
            "Connection {} identified as user {} ({})",
            connection_id, identity.user_id, identity.role
        );
        Ok(entry.state)
    }

    pub fn set_subscription(
        &self,
        connection_id: ConnectionId,
        booking_id: BookingId,
    ) -> Result<SessionState, ProtocolError> {
        let mut entry = self
            .connections
            .get_mut(&connection_id)
            .ok_or(ProtocolError::UnknownConnection)?;
        let previous = entry.state.booking_id();
        entry.state = entry.state.subscribe(booking_id)?;
        match previous {
            Some(old) if old != booking_id => info!(
                "Connection {} moved subscription from booking {} to {}",
                connection_id, old, booking_id
            ),
            _ => info!("Connection {} subscribed to booking {}", connection_id, booking_id),
        }
        Ok(entry.state)
    }

    /// Remove a connection. Returns whether an entry was present; calling it for an
    /// unknown or already-removed connection is a no-op.
    pub fn unregister(&self, connection_id: ConnectionId) -> bool {
        let removed = self.connections.remove(&connection_id).is_some();
        if removed {
            debug!("Unregistered connection {} ({} live)", connection_id, self.len());
        }
        removed
    }

    /// Every connection currently subscribed to `booking_id`. Linear in the number
    /// of live connections.
    pub fn find_subscribers(&self, booking_id: BookingId) -> Vec<Subscriber> {
        self.connections
            .iter()
            .filter(|entry| entry.state.booking_id() == Some(booking_id))
            .map(|entry| Subscriber {
                connection_id: *entry.key(),
                outbox: entry.outbox.clone(),
            })
            .collect()
    }

    pub fn state(&self, connection_id: ConnectionId) -> Option<SessionState> {
        self.connections.get(&connection_id).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Registry entry owned by a connection task.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    connection_id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.connection_id);
    }
}
