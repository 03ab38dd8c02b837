use thiserror::Error;

/// Protocol and validation failures. The `Display` text is what the offending
/// connection receives in `{"type":"error","message":...}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON message")]
    InvalidJson,
    #[error("Message type is required")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("userId and role are required for initialization")]
    MissingIdentity,
    #[error("Unknown role: {0}")]
    InvalidRole(String),
    #[error("Connection is already initialized")]
    AlreadyInitialized,
    #[error("init is required before subscribe_tracking")]
    NotInitialized,
    #[error("bookingId is required for tracking subscription")]
    MissingBookingId,
    #[error("Invalid location update data: {0}")]
    InvalidLocation(String),
    #[error("Unknown connection")]
    UnknownConnection,
}
