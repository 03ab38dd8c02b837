pub mod booking;
pub mod location_sample;
pub mod message;
pub mod session;
