//! Reflector: mirrors the remote collection into the local store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use mirador_client::{ListWatch, RawEvent, TransportError};
use mirador_core::{ChangeEvent, LabelSelector, ObjectRef, ObjectState, ResourceVersion};
use mirador_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backoff::Backoff;
use crate::dispatch::{ClosedError, Dispatcher};

/// Drives list-then-watch against the transport and applies every observed
/// change to the store before publishing it. The store's single writer.
pub struct Reflector<T> {
    transport: T,
    selector: LabelSelector,
    store: Arc<Store>,
    dispatcher: Dispatcher,
    backoff: Backoff,
}

impl<T: ListWatch> Reflector<T> {
    pub fn new(
        transport: T,
        selector: LabelSelector,
        store: Arc<Store>,
        dispatcher: Dispatcher,
        backoff: Backoff,
    ) -> Self {
        Self { transport, selector, store, dispatcher, backoff }
    }

    /// Keep the store consistent with the remote collection until `token`
    /// fires. Transient transport failures retry forever with backoff; only
    /// authentication failures surface to the caller.
    pub async fn run(mut self, token: CancellationToken) -> Result<(), TransportError> {
        let mut cursor: Option<ResourceVersion> = None;

        'outer: while !token.is_cancelled() {
            // (1) With no cursor to resume from, replace the mirror wholesale.
            if cursor.is_none() {
                match self.transport.list().await {
                    Ok(snapshot) => {
                        counter!("mirador_relists_total", 1u64);
                        cursor = Some(snapshot.resource_version.clone());
                        if self.apply_list(snapshot.objects).await.is_err() {
                            break;
                        }
                        self.backoff.reset();
                    }
                    Err(TransportError::Auth(reason)) => return Err(TransportError::Auth(reason)),
                    Err(err) => {
                        if !self.pause(&token, &err).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            // (2) Watch from the cursor.
            let from = match &cursor {
                Some(v) => v.clone(),
                None => continue,
            };
            let mut stream = match self.transport.watch(&from).await {
                Ok(stream) => {
                    self.backoff.reset();
                    stream
                }
                Err(TransportError::VersionExpired) => {
                    debug!(cursor = %from, "cursor expired; forcing full re-list");
                    cursor = None;
                    continue;
                }
                Err(TransportError::Auth(reason)) => return Err(TransportError::Auth(reason)),
                Err(err) => {
                    if !self.pause(&token, &err).await {
                        break;
                    }
                    continue;
                }
            };

            // (3) Consume until the stream drops or desyncs.
            loop {
                tokio::select! {
                    _ = token.cancelled() => break 'outer,
                    maybe = stream.next() => match maybe {
                        Some(Ok(event)) => {
                            cursor = Some(event.object().version.clone());
                            if self.apply_event(event).await.is_err() {
                                break 'outer;
                            }
                        }
                        Some(Err(TransportError::VersionExpired)) => {
                            debug!("watch desynced; forcing full re-list");
                            cursor = None;
                            break;
                        }
                        Some(Err(TransportError::Auth(reason))) => {
                            return Err(TransportError::Auth(reason));
                        }
                        Some(Err(err)) => {
                            if !self.pause(&token, &err).await {
                                break 'outer;
                            }
                            break;
                        }
                        None => {
                            debug!("watch stream ended; resuming at cursor");
                            break;
                        }
                    }
                }
            }
        }

        info!("reflector stopped");
        Ok(())
    }

    /// Wholesale replacement after a full list: unknown identities become
    /// adds, survivors become updates, vanished entries become deletes.
    async fn apply_list(&self, objects: Vec<ObjectState>) -> Result<(), ClosedError> {
        debug!(count = objects.len(), "applying list result");
        let mut keep: HashSet<ObjectRef> = HashSet::with_capacity(objects.len());
        for state in objects {
            if !self.selector.matches(&state.labels) {
                // Server-side filtering should prevent this; drop it regardless.
                continue;
            }
            keep.insert(state.id.clone());
            let new = Arc::new(state);
            let event = match self.store.put(Arc::clone(&new)) {
                None => ChangeEvent::Added(new),
                Some(old) => ChangeEvent::Updated { old, new },
            };
            self.dispatcher.publish(event).await?;
        }
        for removed in self.store.retain(&keep) {
            self.dispatcher.publish(ChangeEvent::Deleted(removed)).await?;
        }
        Ok(())
    }

    /// Apply one watch event: store mutation happens-before the publish.
    async fn apply_event(&self, event: RawEvent) -> Result<(), ClosedError> {
        match event {
            RawEvent::Added(state) | RawEvent::Modified(state) => {
                if !self.selector.matches(&state.labels) {
                    // A label change moved the object out of scope.
                    let state = Arc::new(state);
                    if self.store.delete(&state.id).is_some() {
                        self.dispatcher.publish(ChangeEvent::Deleted(state)).await?;
                    }
                    return Ok(());
                }
                if let Some(existing) = self.store.get(&state.id) {
                    if !state.version.is_newer_than(&existing.version) {
                        counter!("mirador_events_discarded_total", 1u64);
                        debug!(object = %state.id, version = %state.version, "discarding stale event");
                        return Ok(());
                    }
                }
                let new = Arc::new(state);
                let event = match self.store.put(Arc::clone(&new)) {
                    None => ChangeEvent::Added(new),
                    Some(old) => ChangeEvent::Updated { old, new },
                };
                self.dispatcher.publish(event).await?;
            }
            RawEvent::Deleted(state) => {
                let state = Arc::new(state);
                if self.store.delete(&state.id).is_some() {
                    self.dispatcher.publish(ChangeEvent::Deleted(state)).await?;
                } else {
                    debug!(object = %state.id, "delete for unknown object ignored");
                }
            }
        }
        Ok(())
    }

    /// Sleep out one backoff step; false when cancelled mid-sleep.
    async fn pause(&mut self, token: &CancellationToken, err: &TransportError) -> bool {
        let delay = self.backoff.next_delay();
        debug!(error = %err, delay_ms = %delay.as_millis(), "transport failure; backing off");
        sleep_cancellable(token, delay).await
    }
}

async fn sleep_cancellable(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
