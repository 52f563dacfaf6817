//! Redis Streams-backed message channel (durable, at-least-once delivery).
//!
//! This implementation uses Redis Streams consumer groups to provide:
//! - **Durable delivery**: entries persist until acknowledged (XACK)
//! - **At-least-once**: entries left pending are claimed again after
//!   `pending_timeout_ms` and redelivered
//! - **Dead-letter handling**: entries delivered `max_deliveries` times are
//!   copied to the DLQ stream and acknowledged
//!
//! ## Layout
//!
//! - **Stream key**: `ske:<topic>` (e.g. `ske:entity-created`)
//! - **Consumer group**: one per consuming service (default `ske.entity-ingest`)
//! - **Consumer**: unique name per process within the group
//! - **Entry fields**: `payload` (raw message body)
//! - **Dead-letter stream**: `ske:<topic>:dlq`

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};

use ske_events::{Delivery, MessageChannel, Subscription};

/// Prefix for stream keys.
const STREAM_PREFIX: &str = "ske:";

/// Default consumer group.
pub const DEFAULT_GROUP: &str = "ske.entity-ingest";

/// Default deliveries before an entry is dead-lettered.
const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Default idle time after which a pending entry is claimed for redelivery.
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 60_000;

/// Entries fetched per read.
const READ_BATCH: usize = 10;

/// XREADGROUP block timeout.
const READ_BLOCK_MS: usize = 1_000;

/// Deliveries buffered between the reader and the consumer. The reader waits
/// once this is full, so an entry never sits unprocessed long enough to be
/// claimed again as stale.
const DELIVERY_BUFFER: usize = READ_BATCH;

/// Back-off after a failed read before trying again.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(500);

const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),
}

#[derive(Debug, Clone)]
pub struct RedisStreamsChannel {
    client: redis::Client,
    group: String,
    consumer: String,
    max_deliveries: u32,
    pending_timeout_ms: u64,
}

impl RedisStreamsChannel {
    /// Create a new Redis Streams channel.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `group` - Consumer group name (default: `ske.entity-ingest`)
    /// * `consumer` - Consumer name, unique within the group
    pub fn new(
        redis_url: impl AsRef<str>,
        group: Option<String>,
        consumer: impl Into<String>,
    ) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            group: group.unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            consumer: consumer.into(),
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        })
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn stream_key(topic: &str) -> String {
        format!("{STREAM_PREFIX}{topic}")
    }

    pub fn dlq_key(topic: &str) -> String {
        format!("{STREAM_PREFIX}{topic}:dlq")
    }

    async fn connection(&self) -> Result<MultiplexedConnection, RedisStreamsError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Ensure the consumer group exists for `topic` (idempotent).
    ///
    /// Creates the stream too. Starting id `0` means a new group sees the
    /// whole stream.
    pub async fn ensure_consumer_group(&self, topic: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection().await?;
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(Self::stream_key(topic), &self.group, "0")
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::ConsumerGroup(e.to_string())),
        }
    }

    /// Claim pending entries that have been idle too long.
    ///
    /// Entries past `max_deliveries` are dead-lettered and acknowledged instead
    /// of being returned.
    async fn claim_stale(
        &self,
        conn: &mut MultiplexedConnection,
        topic: &str,
    ) -> Result<Vec<Delivery>, RedisStreamsError> {
        let key = Self::stream_key(topic);

        let pending: StreamPendingCountReply = conn
            .xpending_count(&key, &self.group, "-", "+", READ_BATCH)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XPENDING failed: {e}")))?;

        let stale: HashMap<String, u32> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms as u64 >= self.pending_timeout_ms)
            .map(|p| (p.id, p.times_delivered as u32))
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&String> = stale.keys().collect();
        let claimed: StreamClaimReply = conn
            .xclaim(&key, &self.group, &self.consumer, self.pending_timeout_ms, &ids)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {e}")))?;

        let mut deliveries = Vec::with_capacity(claimed.ids.len());
        for entry in claimed.ids {
            // XCLAIM counts as one more delivery.
            let count = stale.get(&entry.id).copied().unwrap_or(1) + 1;

            if count > self.max_deliveries {
                self.dead_letter(conn, topic, &entry, count).await?;
                continue;
            }
            deliveries.push(to_delivery(topic, entry, count));
        }

        Ok(deliveries)
    }

    /// Read entries never delivered to this group.
    async fn read_new(
        &self,
        conn: &mut MultiplexedConnection,
        topic: &str,
    ) -> Result<Vec<Delivery>, RedisStreamsError> {
        let key = Self::stream_key(topic);
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(READ_BATCH)
            .block(READ_BLOCK_MS);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&key], &[">"], &options)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        // A block timeout yields nil.
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        Ok(reply
            .keys
            .into_iter()
            .flat_map(|k| k.ids)
            .map(|entry| to_delivery(topic, entry, 1))
            .collect())
    }

    async fn dead_letter(
        &self,
        conn: &mut MultiplexedConnection,
        topic: &str,
        entry: &StreamId,
        delivery_count: u32,
    ) -> Result<(), RedisStreamsError> {
        let payload: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();

        let _: String = conn
            .xadd(
                Self::dlq_key(topic),
                "*",
                &[
                    ("original_message_id", entry.id.as_bytes().to_vec()),
                    ("delivery_count", delivery_count.to_string().into_bytes()),
                    ("failed_at", chrono::Utc::now().to_rfc3339().into_bytes()),
                    (PAYLOAD_FIELD, payload),
                ],
            )
            .await
            .map_err(|e| RedisStreamsError::Command(format!("DLQ XADD failed: {e}")))?;

        let _: u64 = conn
            .xack(Self::stream_key(topic), &self.group, &[&entry.id])
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;

        warn!(
            message_id = %entry.id,
            delivery_count,
            "message sent to dead-letter queue"
        );
        Ok(())
    }

    /// Background reader: stale pending entries first, then new ones.
    async fn poll_loop(self, topic: String, tx: mpsc::Sender<Delivery>) {
        if let Err(e) = self.ensure_consumer_group(&topic).await {
            error!(topic = %topic, error = %e, "failed to create consumer group");
        }

        // Dedicated connection: XREADGROUP BLOCK would stall a shared one.
        let mut conn: Option<MultiplexedConnection> = None;

        while !tx.is_closed() {
            if conn.is_none() {
                match self.connection().await {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        error!(topic = %topic, error = %e, "redis connection failed");
                        tokio::time::sleep(READ_ERROR_BACKOFF).await;
                        continue;
                    }
                }
            }
            let Some(c) = conn.as_mut() else { continue };

            let batch = match self.claim_stale(c, &topic).await {
                Ok(claimed) if !claimed.is_empty() => Ok(claimed),
                Ok(_) => self.read_new(c, &topic).await,
                Err(e) => Err(e),
            };

            match batch {
                Ok(deliveries) => {
                    for delivery in deliveries {
                        // Waits while the consumer is behind.
                        if tx.send(delivery).await.is_err() {
                            return; // Subscription dropped
                        }
                    }
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "failed to read from stream");
                    conn = None;
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                }
            }
        }

        debug!(topic = %topic, "stream reader stopped");
    }
}

fn delivery_buffer() -> (mpsc::Sender<Delivery>, Subscription<Delivery>) {
    let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
    (tx, Subscription::bounded(rx))
}

fn to_delivery(topic: &str, entry: StreamId, delivery_count: u32) -> Delivery {
    // A missing payload field still reaches the consumer, which drops it as malformed.
    let payload: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();
    Delivery::new(entry.id, topic, payload, delivery_count)
}

#[async_trait]
impl MessageChannel for RedisStreamsChannel {
    type Error = RedisStreamsError;

    #[instrument(skip(self, payload), fields(stream_key = %Self::stream_key(topic)), err)]
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, Self::Error> {
        let mut conn = self.connection().await?;
        let id: String = conn
            .xadd(Self::stream_key(topic), "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;
        Ok(id)
    }

    /// Spawns a reader task on the current tokio runtime; it stops when the
    /// returned subscription is dropped.
    fn subscribe(&self, topic: &str) -> Subscription<Delivery> {
        let (tx, sub) = delivery_buffer();
        tokio::spawn(self.clone().poll_loop(topic.to_string(), tx));
        sub
    }

    #[instrument(skip(self, delivery), fields(message_id = %delivery.message_id()), err)]
    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        let mut conn = self.connection().await?;
        let _: u64 = conn
            .xack(
                Self::stream_key(delivery.topic()),
                &self.group,
                &[delivery.message_id()],
            )
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }
}
