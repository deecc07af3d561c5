//! Periodic resync: re-deliver current store contents as updates.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use mirador_core::ChangeEvent;
use mirador_store::Store;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dispatch::Dispatcher;

/// Re-publishes every store entry as an update on a fixed cadence, guarding
/// against silently missed watch events. Reads the store, never writes it,
/// and never touches the reflector's cursor.
pub struct Resync {
    store: Arc<Store>,
    dispatcher: Dispatcher,
    interval: Duration,
}

impl Resync {
    pub fn new(store: Arc<Store>, dispatcher: Dispatcher, interval: Duration) -> Self {
        Self { store, dispatcher, interval }
    }

    /// Tick until cancelled. The first resync fires one full interval in,
    /// not immediately; the initial list already delivered current state.
    pub async fn run(self, token: CancellationToken) {
        if self.interval.is_zero() {
            info!("periodic resync disabled");
            return;
        }
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // the immediate first tick

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let entries = self.store.list();
                    counter!("mirador_resyncs_total", 1u64);
                    debug!(count = entries.len(), "resync tick");
                    for entry in entries {
                        let event = ChangeEvent::Updated { old: Arc::clone(&entry), new: entry };
                        if self.dispatcher.publish(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}
