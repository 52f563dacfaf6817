/// A single delivery of a message from a channel.
///
/// The payload is kept as raw bytes: decoding is the consumer's job, so a
/// message that cannot be decoded still reaches the consumer and can be
/// acknowledged (dropped) instead of being redelivered forever.
///
/// Under at-least-once delivery the same `message_id` may show up more than
/// once; `delivery_count` starts at 1 and grows with every redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    message_id: String,
    topic: String,
    payload: Vec<u8>,
    delivery_count: u32,
}

impl Delivery {
    pub fn new(
        message_id: impl Into<String>,
        topic: impl Into<String>,
        payload: Vec<u8>,
        delivery_count: u32,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            topic: topic.into(),
            payload,
            delivery_count,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// True if this is not the first time the message is delivered.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    /// Copy of this delivery as it would look on its next redelivery.
    pub fn redelivered(&self) -> Self {
        Self {
            delivery_count: self.delivery_count.saturating_add(1),
            ..self.clone()
        }
    }
}
