//! Infrastructure layer: storage, the entity service, message ingestion.

pub mod entity_service;
pub mod event_bus;
pub mod ingest;
pub mod store;
pub mod workers;
