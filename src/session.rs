//! Per-connection protocol state.
//!
//! ```text
//! CONNECTED --init--> IDENTIFIED --subscribe_tracking--> SUBSCRIBED
//!                                                          |   ^
//!                                                          +---+ subscribe_tracking
//! ```
//!
//! `location_update` and `ping` are accepted in every state and never move it.

use crate::error::ProtocolError;
use crate::models::session::{BookingId, Identity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Identified(Identity),
    Subscribed {
        identity: Identity,
        booking_id: BookingId,
    },
}

impl SessionState {
    /// Apply `init`. Only valid once, from `Connected`.
    pub fn identify(&self, identity: Identity) -> Result<SessionState, ProtocolError> {
        match self {
            SessionState::Connected => Ok(SessionState::Identified(identity)),
            _ => Err(ProtocolError::AlreadyInitialized),
        }
    }

    /// Apply `subscribe_tracking`, replacing any earlier subscription.
    pub fn subscribe(&self, booking_id: BookingId) -> Result<SessionState, ProtocolError> {
        match self.identity() {
            Some(identity) => Ok(SessionState::Subscribed {
                identity,
                booking_id,
            }),
            None => Err(ProtocolError::NotInitialized),
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        match self {
            SessionState::Connected => None,
            SessionState::Identified(identity) => Some(*identity),
            SessionState::Subscribed { identity, .. } => Some(*identity),
        }
    }

    pub fn booking_id(&self) -> Option<BookingId> {
        match self {
            SessionState::Subscribed { booking_id, .. } => Some(*booking_id),
            _ => None,
        }
    }
}
