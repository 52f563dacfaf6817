//! Message publishing/subscription abstraction (mechanics only).
//!
//! ## Delivery Contract
//!
//! Channels provide **at-least-once** delivery with explicit acknowledgement:
//!
//! - A message stays pending until the consumer calls `acknowledge()`
//! - Unacknowledged messages may be delivered again (crash, timeout, restart)
//! - Messages may arrive out of order
//!
//! Consumers must therefore be idempotent: handling the same delivery twice
//! must leave the system in the same state as handling it once. Consumers also
//! decide *when* to acknowledge; in particular a message that can never be
//! processed (a poison message) should be acknowledged after logging, or it
//! would be redelivered forever.
//!
//! ## Usage Pattern
//!
//! ```ignore
//! let mut sub = channel.subscribe(ENTITY_CREATED_TOPIC);
//! while let Some(delivery) = sub.recv().await {
//!     if process(&delivery).await.is_ok() {
//!         channel.acknowledge(&delivery).await?;
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::delivery::Delivery;

#[derive(Debug)]
enum Receiver<M> {
    Unbounded(mpsc::UnboundedReceiver<M>),
    Bounded(mpsc::Receiver<M>),
}

/// A subscription to one topic of a channel.
///
/// Designed for a single consumer task. Dropping the subscription tells the
/// channel to stop feeding it.
///
/// Broker-backed channels should use [`bounded`](Self::bounded): the reader
/// then waits for the consumer instead of buffering ahead of it.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::UnboundedReceiver<M>) -> Self {
        Self {
            receiver: Receiver::Unbounded(receiver),
        }
    }

    pub fn bounded(receiver: mpsc::Receiver<M>) -> Self {
        Self {
            receiver: Receiver::Bounded(receiver),
        }
    }

    /// Wait for the next message. `None` once the channel side is gone.
    pub async fn recv(&mut self) -> Option<M> {
        match &mut self.receiver {
            Receiver::Unbounded(rx) => rx.recv().await,
            Receiver::Bounded(rx) => rx.recv().await,
        }
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, mpsc::error::TryRecvError> {
        match &mut self.receiver {
            Receiver::Unbounded(rx) => rx.try_recv(),
            Receiver::Bounded(rx) => rx.try_recv(),
        }
    }
}

/// Transport-agnostic message channel with explicit acknowledgement.
///
/// Implementations: [`InMemoryChannel`](crate::InMemoryChannel) for
/// tests/dev, Redis Streams in `ske-infra` for deployments.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish a raw payload on `topic`, returning the channel's message id.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, Self::Error>;

    /// Start consuming `topic`.
    fn subscribe(&self, topic: &str) -> Subscription<Delivery>;

    /// Mark a delivery as processed so it is not delivered again.
    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), Self::Error>;
}

#[async_trait]
impl<C> MessageChannel for Arc<C>
where
    C: MessageChannel + ?Sized,
{
    type Error = C::Error;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, Self::Error> {
        (**self).publish(topic, payload).await
    }

    fn subscribe(&self, topic: &str) -> Subscription<Delivery> {
        (**self).subscribe(topic)
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        (**self).acknowledge(delivery).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_subscription_holds_back_the_producer() {
        let (tx, rx) = mpsc::channel(2);
        let mut sub = Subscription::bounded(rx);

        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert!(matches!(tx.try_send(3), Err(mpsc::error::TrySendError::Full(3))));

        assert_eq!(sub.recv().await, Some(1));
        tx.try_send(3).unwrap();
        assert_eq!(sub.try_recv(), Ok(2));
        assert_eq!(sub.recv().await, Some(3));

        drop(tx);
        assert_eq!(sub.recv().await, None);
    }
}
