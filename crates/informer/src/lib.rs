//! Mirador informer: a label-filtered, resync-safe local mirror of one
//! remote resource collection.
//!
//! The [`Informer`] wires the pieces together: a [`Reflector`] drives
//! list+watch through a [`mirador_client::ListWatch`] transport and keeps
//! the [`mirador_store::Store`] fresh, the dispatcher fans change events
//! out to subscribed [`Handler`]s in arrival order, and [`Resync`]
//! re-delivers current state on a fixed cadence.

#![forbid(unsafe_code)]

mod backoff;
mod dispatch;
mod reflector;
mod resync;

pub use backoff::Backoff;
pub use dispatch::{bounded, ClosedError, DeliveryLoop, Dispatcher, Handler};
pub use reflector::Reflector;
pub use resync::Resync;

use std::sync::Arc;
use std::time::Duration;

use mirador_client::{ListWatch, TransportError};
use mirador_core::LabelSelector;
use mirador_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Tunables for one informer instance.
#[derive(Debug, Clone)]
pub struct InformerConfig {
    pub selector: LabelSelector,
    /// Dispatcher queue depth; a full queue blocks the reflector.
    pub queue_capacity: usize,
    /// `None` (or zero) disables periodic resync.
    pub resync_interval: Option<Duration>,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            selector: LabelSelector::new(),
            queue_capacity: 1024,
            resync_interval: Some(Duration::from_secs(30)),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// A local mirror of one remote collection plus its event fan-out.
pub struct Informer<T> {
    transport: T,
    config: InformerConfig,
    store: Arc<Store>,
    dispatcher: Dispatcher,
    delivery: DeliveryLoop,
}

impl<T: ListWatch> Informer<T> {
    pub fn new(transport: T, config: InformerConfig) -> Self {
        let (dispatcher, delivery) = dispatch::bounded(config.queue_capacity);
        Self { transport, config, store: Arc::new(Store::new()), dispatcher, delivery }
    }

    /// Read handle over the mirrored state.
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    /// Register a handler set; call before [`Informer::run`] to observe the
    /// initial adds.
    pub fn subscribe(&self, handler: Arc<dyn Handler>) {
        self.dispatcher.subscribe(handler);
    }

    /// Drive the informer until `token` fires. Returns `Err` only for fatal
    /// authentication failures. Queued events are drained before returning.
    pub async fn run(self, token: CancellationToken) -> Result<(), TransportError> {
        let Self { transport, config, store, dispatcher, delivery } = self;

        let children = token.child_token();
        let delivery_handle = tokio::spawn(delivery.run(children.clone()));

        let resync_handle = match config.resync_interval {
            Some(interval) if !interval.is_zero() => {
                let resync = Resync::new(Arc::clone(&store), dispatcher.clone(), interval);
                Some(tokio::spawn(resync.run(children.clone())))
            }
            _ => {
                info!("periodic resync disabled");
                None
            }
        };

        let backoff = Backoff::new(config.backoff_base, config.backoff_max);
        let reflector =
            Reflector::new(transport, config.selector, Arc::clone(&store), dispatcher.clone(), backoff);
        let result = reflector.run(children.clone()).await;

        // Cooperative shutdown: stop the producers, then let the delivery
        // loop finish what is already queued.
        children.cancel();
        if let Some(handle) = resync_handle {
            let _ = handle.await;
        }
        drop(dispatcher);
        if let Err(err) = delivery_handle.await {
            warn!(error = %err, "delivery loop join failed");
        }
        result
    }
}
