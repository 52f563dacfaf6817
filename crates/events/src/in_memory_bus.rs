//! In-memory message channel for tests/dev.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::bus::{MessageChannel, Subscription};
use crate::delivery::Delivery;

#[derive(Debug, thiserror::Error)]
pub enum InMemoryChannelError {
    /// Internal lock poisoning.
    #[error("in-memory channel lock poisoned")]
    Poisoned,
    /// Acknowledging a message that is not pending (unknown or already acked).
    #[error("message {0} is not pending")]
    NotPending(String),
}

#[derive(Debug)]
struct Subscriber {
    topic: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug)]
struct Pending {
    delivery: Delivery,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    /// Delivered but not yet acknowledged, keyed by message id.
    pending: BTreeMap<String, Pending>,
}

impl Inner {
    fn fan_out(&mut self, delivery: &Delivery) {
        // Drop any dead subscribers while publishing.
        self.subscribers
            .retain(|s| s.topic != delivery.topic() || s.tx.send(delivery.clone()).is_ok());
    }
}

/// In-memory at-least-once channel.
///
/// - No IO
/// - Every subscriber of a topic gets a copy of each message
/// - Messages stay pending until acknowledged; [`redeliver_pending`]
///   simulates a broker redelivering everything still unacknowledged, and
///   [`spawn_redelivery`] does it periodically for messages left idle
///
/// [`redeliver_pending`]: InMemoryChannel::redeliver_pending
/// [`spawn_redelivery`]: InMemoryChannel::spawn_redelivery
#[derive(Debug, Default)]
pub struct InMemoryChannel {
    inner: Mutex<Inner>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delivered-but-unacknowledged messages.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().map(|i| i.pending.len()).unwrap_or(0)
    }

    /// Deliver every pending message again, bumping its delivery count.
    ///
    /// Returns how many messages were redelivered.
    pub fn redeliver_pending(&self) -> Result<usize, InMemoryChannelError> {
        self.redeliver_idle(Duration::ZERO)
    }

    /// Redeliver pending messages last delivered at least `min_idle` ago.
    pub fn redeliver_idle(&self, min_idle: Duration) -> Result<usize, InMemoryChannelError> {
        let mut inner = self.inner.lock().map_err(|_| InMemoryChannelError::Poisoned)?;
        let now = Instant::now();

        let redeliveries: Vec<Delivery> = inner
            .pending
            .values()
            .filter(|p| now.saturating_duration_since(p.delivered_at) >= min_idle)
            .map(|p| p.delivery.redelivered())
            .collect();
        for delivery in &redeliveries {
            inner.pending.insert(
                delivery.message_id().to_string(),
                Pending {
                    delivery: delivery.clone(),
                    delivered_at: now,
                },
            );
            inner.fan_out(delivery);
        }

        Ok(redeliveries.len())
    }

    /// Every `every`, redeliver messages idle for at least `min_idle`.
    ///
    /// The task ends once the channel is dropped; abort the handle to stop it
    /// earlier.
    pub fn spawn_redelivery(self: &Arc<Self>, every: Duration, min_idle: Duration) -> JoinHandle<()> {
        let channel = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(channel) = channel.upgrade() else {
                    break;
                };
                match channel.redeliver_idle(min_idle) {
                    Ok(0) => {}
                    Ok(n) => info!(redelivered = n, "redelivered idle messages"),
                    Err(_) => break,
                }
            }
        })
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    type Error = InMemoryChannelError;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, Self::Error> {
        let mut inner = self.inner.lock().map_err(|_| InMemoryChannelError::Poisoned)?;

        inner.next_id += 1;
        let message_id = format!("mem-{}", inner.next_id);
        let delivery = Delivery::new(message_id.clone(), topic, payload, 1);

        inner.pending.insert(
            message_id.clone(),
            Pending {
                delivery: delivery.clone(),
                delivered_at: Instant::now(),
            },
        );
        inner.fan_out(&delivery);

        debug!(topic, message_id = %message_id, "message published");
        Ok(message_id)
    }

    fn subscribe(&self, topic: &str) -> Subscription<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages.
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.push(Subscriber {
                topic: topic.to_string(),
                tx,
            });
        }

        Subscription::new(rx)
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().map_err(|_| InMemoryChannelError::Poisoned)?;
        match inner.pending.remove(delivery.message_id()) {
            Some(_) => Ok(()),
            None => Err(InMemoryChannelError::NotPending(
                delivery.message_id().to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_only_their_topic() {
        let channel = InMemoryChannel::new();
        let mut created = channel.subscribe("entity-created");
        let mut other = channel.subscribe("something-else");

        channel.publish("entity-created", b"{}".to_vec()).await.unwrap();

        let d = created.recv().await.unwrap();
        assert_eq!(d.topic(), "entity-created");
        assert_eq!(d.payload(), b"{}");
        assert_eq!(d.delivery_count(), 1);
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn acknowledged_messages_are_not_redelivered() {
        let channel = InMemoryChannel::new();
        let mut sub = channel.subscribe("t");

        channel.publish("t", b"a".to_vec()).await.unwrap();
        channel.publish("t", b"b".to_vec()).await.unwrap();
        assert_eq!(channel.pending_count(), 2);

        let first = sub.recv().await.unwrap();
        channel.acknowledge(&first).await.unwrap();
        let _second = sub.recv().await.unwrap();

        assert_eq!(channel.redeliver_pending().unwrap(), 1);
        let again = sub.recv().await.unwrap();
        assert_eq!(again.payload(), b"b");
        assert_eq!(again.delivery_count(), 2);
        assert!(again.is_redelivery());
    }

    #[tokio::test]
    async fn only_idle_messages_are_redelivered() {
        let channel = InMemoryChannel::new();
        let mut sub = channel.subscribe("t");
        channel.publish("t", b"a".to_vec()).await.unwrap();
        sub.recv().await.unwrap();

        assert_eq!(channel.redeliver_idle(Duration::from_secs(60)).unwrap(), 0);
        assert!(sub.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(channel.redeliver_idle(Duration::from_millis(10)).unwrap(), 1);
        assert_eq!(sub.recv().await.unwrap().delivery_count(), 2);
    }

    #[tokio::test]
    async fn unacknowledged_messages_come_back_periodically() {
        let channel = Arc::new(InMemoryChannel::new());
        let mut sub = channel.subscribe("t");
        let redelivery =
            channel.spawn_redelivery(Duration::from_millis(10), Duration::from_millis(10));

        channel.publish("t", b"retry me".to_vec()).await.unwrap();
        let first = sub.recv().await.unwrap();
        assert_eq!(first.delivery_count(), 1);

        // Not acknowledged: it shows up again without anyone asking.
        let again = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.message_id(), first.message_id());
        assert!(again.is_redelivery());

        channel.acknowledge(&again).await.unwrap();
        assert_eq!(channel.pending_count(), 0);
        redelivery.abort();
    }

    #[tokio::test]
    async fn double_ack_is_reported() {
        let channel = InMemoryChannel::new();
        let mut sub = channel.subscribe("t");
        channel.publish("t", Vec::new()).await.unwrap();

        let d = sub.recv().await.unwrap();
        channel.acknowledge(&d).await.unwrap();
        assert!(matches!(
            channel.acknowledge(&d).await,
            Err(InMemoryChannelError::NotPending(_))
        ));
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let channel = InMemoryChannel::new();
        let sub = channel.subscribe("t");
        drop(sub);

        channel.publish("t", Vec::new()).await.unwrap();
        assert_eq!(channel.inner.lock().unwrap().subscribers.len(), 0);
    }
}
