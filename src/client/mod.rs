//! Reconnecting tracking client used by driver, passenger and admin sessions.

pub mod backoff;
pub mod controller;
pub mod timers;

pub use backoff::{ReconnectBackoff, RetryDecision};
pub use controller::{ConnectionStatus, LocationFix, TrackingClient};
