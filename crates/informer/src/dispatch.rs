//! Event dispatcher: bounded queue, ordered fan-out, isolated handlers.
//!
//! Events flow through one bounded main queue into a per-subscriber bounded
//! queue, each drained by its own worker task. Publish order is preserved
//! for every subscriber; a subscriber that falls behind only stalls the
//! others once its own buffer fills, which then backs pressure up through
//! the main queue to the reflector.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use metrics::counter;
use mirador_core::{ChangeEvent, ObjectState};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handler capability set. Default bodies are no-ops so a subscriber only
/// implements the hooks it cares about.
///
/// Every hook is invoked at-least-once per logical change (resync
/// re-invokes `on_update` for unchanged objects), so implementations must
/// be idempotent. A panicking handler is logged and skipped; it never
/// affects other handlers or the informer itself.
pub trait Handler: Send + Sync {
    fn on_add(&self, _new: &ObjectState) {}
    fn on_update(&self, _old: &ObjectState, _new: &ObjectState) {}
    fn on_delete(&self, _last: &ObjectState) {}
}

/// The delivery loop is gone; the informer is shutting down.
#[derive(Debug, thiserror::Error)]
#[error("dispatcher closed")]
pub struct ClosedError;

/// Subscriber queues: swapped wholesale on (rare) registration so the
/// per-event fan-out path stays lock-free.
struct Registry {
    senders: ArcSwap<Vec<mpsc::Sender<ChangeEvent>>>,
    write: Mutex<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            senders: ArcSwap::from_pointee(Vec::new()),
            write: Mutex::new(()),
            workers: Mutex::new(Vec::new()),
        }
    }

    fn workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Publish half of the dispatch pair. Cheap to clone; every producer
/// (reflector, resync) holds one.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<ChangeEvent>,
    registry: Arc<Registry>,
    capacity: usize,
}

/// Consume half: drains the main queue and fans events out to the
/// per-subscriber queues in publish order.
pub struct DeliveryLoop {
    rx: mpsc::Receiver<ChangeEvent>,
    registry: Arc<Registry>,
}

/// Build the bounded dispatch pair. `capacity` sizes both the main queue
/// and each subscriber's buffer. A full queue blocks publishers until
/// consumers catch up; this is the informer's single back-pressure point.
pub fn bounded(capacity: usize) -> (Dispatcher, DeliveryLoop) {
    let (tx, rx) = mpsc::channel(capacity);
    let registry = Arc::new(Registry::new());
    (
        Dispatcher { tx, registry: Arc::clone(&registry), capacity },
        DeliveryLoop { rx, registry },
    )
}

impl Dispatcher {
    /// Register a handler set and spawn its worker. Events published after
    /// this call reach it in publish order, interleaved identically for all
    /// subscribers. Must be called from within the runtime.
    pub fn subscribe(&self, handler: Arc<dyn Handler>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let worker = tokio::spawn(subscriber_worker(rx, handler));

        let _guard = self.registry.write.lock().unwrap_or_else(|e| e.into_inner());
        let mut senders = Vec::clone(&self.registry.senders.load());
        senders.push(tx);
        self.registry.senders.store(Arc::new(senders));
        self.registry.workers().push(worker);
    }

    /// Enqueue for delivery. Awaits while the queue is full; fails only
    /// once the delivery loop has stopped.
    pub async fn publish(&self, event: ChangeEvent) -> Result<(), ClosedError> {
        counter!("mirador_events_published_total", 1u64, "kind" => event.kind());
        self.tx.send(event).await.map_err(|_| ClosedError)
    }
}

impl DeliveryLoop {
    /// Forward events until cancellation or until every publisher is gone,
    /// then close the subscriber queues and wait for the workers to finish
    /// what was already handed to them.
    pub async fn run(mut self, token: CancellationToken) {
        loop {
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(event) => self.forward(event).await,
                    None => break,
                },
                _ = token.cancelled() => {
                    self.rx.close();
                    while let Ok(event) = self.rx.try_recv() {
                        self.forward(event).await;
                    }
                    break;
                }
            }
        }

        // Dropping the senders lets each worker drain its queue and exit.
        self.registry.senders.store(Arc::new(Vec::new()));
        let workers = std::mem::take(&mut *self.registry.workers());
        for worker in workers {
            let _ = worker.await;
        }
        debug!("delivery loop stopped");
    }

    async fn forward(&self, event: ChangeEvent) {
        let senders = self.registry.senders.load_full();
        for tx in senders.iter() {
            // Err only during shutdown teardown; delivery stays best-effort.
            let _ = tx.send(event.clone()).await;
        }
    }
}

async fn subscriber_worker(mut rx: mpsc::Receiver<ChangeEvent>, handler: Arc<dyn Handler>) {
    while let Some(event) = rx.recv().await {
        let outcome = catch_unwind(AssertUnwindSafe(|| match &event {
            ChangeEvent::Added(new) => handler.on_add(new),
            ChangeEvent::Updated { old, new } => handler.on_update(old, new),
            ChangeEvent::Deleted(last) => handler.on_delete(last),
        }));
        if outcome.is_err() {
            counter!("mirador_handler_panics_total", 1u64);
            warn!(kind = event.kind(), object = %event.object().id, "handler panicked; continuing");
        }
    }
}
