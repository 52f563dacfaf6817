//! Long-lived background consumers.

pub mod ingest_worker;

pub use ingest_worker::{IngestWorker, WorkerHandle};
