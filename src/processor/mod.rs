pub mod location_ingest;
pub mod message_processor;
