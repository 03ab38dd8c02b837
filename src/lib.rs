//! Real-time location tracking for limo bookings.
//!
//! Drivers stream GPS fixes over a WebSocket; each fix is appended to the booking's
//! location history, moves the booking's last-known-location pointer, and is pushed
//! to every connection subscribed to that booking. The `client` module holds the
//! reconnecting consumer side.

pub mod broadcaster;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod processor;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;
