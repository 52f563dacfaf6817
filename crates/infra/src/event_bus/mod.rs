//! Infrastructure message channel implementations.
//!
//! The channel contract lives in `ske-events` as pure mechanics. This module
//! provides broker-backed implementations (e.g. Redis Streams).

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsChannel, RedisStreamsError};
