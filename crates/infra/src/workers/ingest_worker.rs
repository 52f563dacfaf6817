use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use ske_events::{Delivery, MessageChannel, Subscription};

use crate::ingest::{EntityCreatedHandler, IngestOutcome};
use crate::store::EntityStore;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A message already being processed is finished (and acknowledged if
    /// appropriate) before the worker exits.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "ingest worker task failed");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

/// Consumer loop for `entity-created` messages.
///
/// - Subscribes to one topic of a channel
/// - Runs each delivery through the (idempotent) handler, one at a time
/// - Acknowledges unless the handler asks for redelivery
/// - Never surfaces failures to anyone else; it only logs them
#[derive(Debug)]
pub struct IngestWorker;

impl IngestWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn<C, S>(
        name: &'static str,
        channel: C,
        topic: &str,
        handler: EntityCreatedHandler<S>,
    ) -> WorkerHandle
    where
        C: MessageChannel + 'static,
        S: EntityStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sub = channel.subscribe(topic);

        let span = info_span!("ingest_worker", worker = name, topic = %topic);
        let join = tokio::spawn(worker_loop(channel, sub, shutdown_rx, handler).instrument(span));

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

async fn worker_loop<C, S>(
    channel: C,
    mut sub: Subscription<Delivery>,
    mut shutdown_rx: watch::Receiver<bool>,
    handler: EntityCreatedHandler<S>,
) where
    C: MessageChannel,
    S: EntityStore,
{
    info!("ingest worker started");

    loop {
        let delivery = tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                // Sender dropped counts as shutdown too.
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            next = sub.recv() => match next {
                Some(delivery) => delivery,
                None => {
                    warn!("subscription closed");
                    break;
                }
            },
        };

        // Outside the select: a message is never abandoned half-way.
        process(&channel, &handler, &delivery).await;
    }

    info!("ingest worker stopped");
}

async fn process<C, S>(channel: &C, handler: &EntityCreatedHandler<S>, delivery: &Delivery)
where
    C: MessageChannel,
    S: EntityStore,
{
    let outcome = handler.handle(delivery.payload()).await;

    info!(
        message_id = %delivery.message_id(),
        delivery_count = delivery.delivery_count(),
        outcome = outcome.as_str(),
        "entity-created message handled"
    );

    if !outcome.should_acknowledge() {
        if let IngestOutcome::Retry(reason) = &outcome {
            warn!(message_id = %delivery.message_id(), reason = %reason, "message left pending for redelivery");
        }
        return;
    }

    if let Err(e) = channel.acknowledge(delivery).await {
        error!(message_id = %delivery.message_id(), error = %e, "failed to acknowledge message");
    }
}
