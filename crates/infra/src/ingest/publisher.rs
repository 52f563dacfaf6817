use tracing::instrument;

use ske_core::Entity;
use ske_events::{ENTITY_CREATED_TOPIC, MessageChannel};

use super::handler::EntityCreatedPayload;

#[derive(Debug, thiserror::Error)]
pub enum PublishError<E: std::error::Error + 'static> {
    #[error("failed to serialize entity: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("channel rejected message: {0}")]
    Channel(#[source] E),
}

/// Publishes entities on the `entity-created` topic.
#[derive(Debug, Clone)]
pub struct EntityCreatedPublisher<C> {
    channel: C,
}

impl<C> EntityCreatedPublisher<C>
where
    C: MessageChannel,
{
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Serialize `entity` and publish it; returns the channel's message id.
    #[instrument(skip(self, entity), fields(entity_id = %entity.id), err)]
    pub async fn publish(&self, entity: &Entity) -> Result<String, PublishError<C::Error>> {
        let payload = serde_json::to_vec(entity)?;
        self.channel
            .publish(ENTITY_CREATED_TOPIC, payload)
            .await
            .map_err(PublishError::Channel)
    }

    /// Publish a payload that is not a full entity (id + title only).
    pub async fn publish_payload(
        &self,
        payload: &EntityCreatedPayload,
    ) -> Result<String, PublishError<C::Error>> {
        let payload = serde_json::to_vec(payload)?;
        self.channel
            .publish(ENTITY_CREATED_TOPIC, payload)
            .await
            .map_err(PublishError::Channel)
    }
}
