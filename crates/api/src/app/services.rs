//! Infrastructure wiring: store, message channel, entity service, ingest worker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use ske_core::PaginationPolicy;
use ske_events::{ENTITY_CREATED_TOPIC, InMemoryChannel};
use ske_infra::entity_service::EntityService;
use ske_infra::ingest::EntityCreatedHandler;
use ske_infra::store::{EntityStore, InMemoryEntityStore, StoreError};
use ske_infra::workers::{IngestWorker, WorkerHandle};

#[cfg(feature = "redis")]
use ske_infra::event_bus::{RedisStreamsChannel, RedisStreamsError};
#[cfg(feature = "redis")]
use ske_infra::store::PostgresEntityStore;

use crate::config::AppConfig;

/// How often the in-memory channel looks for unacknowledged messages.
const REDELIVERY_INTERVAL: Duration = Duration::from_secs(5);

/// How long a message may stay unacknowledged before it is delivered again.
/// Matches the pending timeout of the Redis Streams channel.
const REDELIVERY_MIN_IDLE: Duration = Duration::from_secs(60);

/// Type-erased store so both backends share one service type.
pub type DynEntityStore = Arc<dyn EntityStore>;

pub type Entities = EntityService<DynEntityStore>;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("store setup failed: {0}")]
    Store(#[from] StoreError),
    #[cfg(feature = "redis")]
    #[error("channel setup failed: {0}")]
    Channel(#[from] RedisStreamsError),
}

/// The message channel the ingest worker consumes from.
#[derive(Debug, Clone)]
pub enum Channel {
    InMemory(Arc<InMemoryChannel>),
    #[cfg(feature = "redis")]
    Redis(Arc<RedisStreamsChannel>),
}

pub struct AppServices {
    entities: Arc<Entities>,
    pagination: PaginationPolicy,
    channel: Channel,
    worker: Mutex<Option<WorkerHandle>>,
    /// In-memory mode only; Redis reclaims stale entries itself.
    redelivery: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("pagination", &self.pagination)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, StartupError> {
    if config.use_persistent_stores {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services(config).await;
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
        }
    }

    Ok(build_in_memory_services(config))
}

/// In-memory store + channel (dev/test).
pub fn build_in_memory_services(config: &AppConfig) -> AppServices {
    let store: DynEntityStore = Arc::new(InMemoryEntityStore::new());
    let channel = Arc::new(InMemoryChannel::new());

    let entities = Arc::new(EntityService::new(store));
    let worker = IngestWorker::spawn(
        "entity-ingest",
        channel.clone(),
        ENTITY_CREATED_TOPIC,
        EntityCreatedHandler::new(entities.clone()),
    );

    // Messages left pending (store failures) come back after a while.
    let redelivery = channel.spawn_redelivery(REDELIVERY_INTERVAL, REDELIVERY_MIN_IDLE);

    tracing::info!("wired in-memory store and channel");
    let mut services =
        AppServices::new(entities, config.pagination, Channel::InMemory(channel), worker);
    services.redelivery = Some(redelivery);
    services
}

#[cfg(feature = "redis")]
async fn build_persistent_services(config: &AppConfig) -> Result<AppServices, StartupError> {
    // `from_lookup` guarantees a URL in persistent mode.
    let database_url = config.database_url.as_deref().unwrap_or_default();

    let store: DynEntityStore = Arc::new(PostgresEntityStore::connect(database_url).await?);

    let channel = Arc::new(RedisStreamsChannel::new(
        &config.redis_url,
        None,
        config.ingest_consumer.clone(),
    )?);
    channel.ensure_consumer_group(ENTITY_CREATED_TOPIC).await?;

    let entities = Arc::new(EntityService::new(store));
    let worker = IngestWorker::spawn(
        "entity-ingest",
        channel.clone(),
        ENTITY_CREATED_TOPIC,
        EntityCreatedHandler::new(entities.clone()),
    );

    tracing::info!(consumer = %config.ingest_consumer, "wired postgres store and redis streams channel");
    Ok(AppServices::new(entities, config.pagination, Channel::Redis(channel), worker))
}

impl AppServices {
    fn new(
        entities: Arc<Entities>,
        pagination: PaginationPolicy,
        channel: Channel,
        worker: WorkerHandle,
    ) -> Self {
        Self {
            entities,
            pagination,
            channel,
            worker: Mutex::new(Some(worker)),
            redelivery: None,
        }
    }

    pub fn entities(&self) -> &Entities {
        &self.entities
    }

    pub fn pagination(&self) -> PaginationPolicy {
        self.pagination
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// The in-memory channel, when that is what was wired.
    pub fn in_memory_channel(&self) -> Option<Arc<InMemoryChannel>> {
        match &self.channel {
            Channel::InMemory(c) => Some(c.clone()),
            #[cfg(feature = "redis")]
            Channel::Redis(_) => None,
        }
    }

    /// True while background tasks (ingest worker, redelivery) are running.
    pub fn is_running(&self) -> bool {
        let worker_running = match self.worker.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|w| !w.is_finished()),
            Err(_) => false,
        };
        let redelivery_running = self.redelivery.as_ref().is_some_and(|r| !r.is_finished());
        worker_running || redelivery_running
    }

    /// Stop the ingest worker and redelivery (idempotent).
    pub async fn shutdown(&self) {
        if let Some(redelivery) = &self.redelivery {
            redelivery.abort();
        }
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            worker.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_services_stop_all_background_tasks() {
        let services = build_in_memory_services(&AppConfig::in_memory());
        assert!(services.redelivery.is_some());
        assert!(services.is_running());

        services.shutdown().await;
        // Abort takes effect at the task's next yield point.
        for _ in 0..100 {
            if !services.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!services.is_running());

        // Second shutdown is a no-op.
        services.shutdown().await;
    }
}
