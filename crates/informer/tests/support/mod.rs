//! Shared scaffolding: a scripted transport and a recording handler.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use mirador_client::{EventStream, ListSnapshot, ListWatch, RawEvent, TransportError};
use mirador_core::{LabelSelector, ObjectState, ResourceVersion};
use mirador_informer::{Handler, InformerConfig};

pub fn obj(name: &str, rv: &str) -> ObjectState {
    obj_labeled(name, rv, &[])
}

pub fn obj_labeled(name: &str, rv: &str, labels: &[(&str, &str)]) -> ObjectState {
    let labels: serde_json::Map<String, serde_json::Value> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    ObjectState::from_raw(serde_json::json!({
        "metadata": {
            "name": name,
            "namespace": "default",
            "resourceVersion": rv,
            "labels": labels,
        }
    }))
    .unwrap()
}

pub fn snap(objects: Vec<ObjectState>, rv: &str) -> ListSnapshot {
    ListSnapshot { objects, resource_version: ResourceVersion::from(rv) }
}

pub fn test_config(selector: LabelSelector) -> InformerConfig {
    InformerConfig {
        selector,
        queue_capacity: 64,
        resync_interval: None,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(40),
    }
}

/// One scripted watch session: either fails to open, or yields a fixed
/// item sequence and then ends (or hangs, when `hang` was requested).
pub struct WatchScript {
    open: Result<Vec<Result<RawEvent, TransportError>>, TransportError>,
    hang_after: bool,
}

impl WatchScript {
    pub fn events(items: Vec<Result<RawEvent, TransportError>>) -> Self {
        Self { open: Ok(items), hang_after: false }
    }

    pub fn fails(err: TransportError) -> Self {
        Self { open: Err(err), hang_after: false }
    }

    /// Keep the stream open (pending) after the scripted items.
    pub fn hang(mut self) -> Self {
        self.hang_after = true;
        self
    }
}

/// Call log shared with the test after the transport moves into the informer.
#[derive(Default)]
pub struct Probe {
    list_calls: Mutex<usize>,
    watch_from: Mutex<Vec<String>>,
}

impl Probe {
    pub fn list_count(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    pub fn watch_versions(&self) -> Vec<String> {
        self.watch_from.lock().unwrap().clone()
    }
}

/// `ListWatch` driven by pre-scripted responses. Exhausted scripts hang
/// instead of erroring so a finished scenario stays quiescent.
pub struct ScriptedTransport {
    lists: Mutex<VecDeque<Result<ListSnapshot, TransportError>>>,
    watches: Mutex<VecDeque<WatchScript>>,
    probe: Arc<Probe>,
}

impl ScriptedTransport {
    pub fn new(
        lists: Vec<Result<ListSnapshot, TransportError>>,
        watches: Vec<WatchScript>,
    ) -> Self {
        Self {
            lists: Mutex::new(lists.into()),
            watches: Mutex::new(watches.into()),
            probe: Arc::new(Probe::default()),
        }
    }

    pub fn probe(&self) -> Arc<Probe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait]
impl ListWatch for ScriptedTransport {
    async fn list(&self) -> Result<ListSnapshot, TransportError> {
        *self.probe.list_calls.lock().unwrap() += 1;
        let next = self.lists.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn watch(&self, from: &ResourceVersion) -> Result<EventStream, TransportError> {
        self.probe.watch_from.lock().unwrap().push(from.as_str().to_string());
        let next = self.watches.lock().unwrap().pop_front();
        match next {
            Some(WatchScript { open: Ok(items), hang_after }) => {
                let events = stream::iter(items);
                if hang_after {
                    Ok(events.chain(stream::pending()).boxed())
                } else {
                    Ok(events.boxed())
                }
            }
            Some(WatchScript { open: Err(err), .. }) => Err(err),
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Handler that records every invocation as a readable line.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, line: String) {
        self.calls.lock().unwrap().push(line);
    }
}

impl Handler for Recorder {
    fn on_add(&self, new: &ObjectState) {
        self.push(format!("add {}@{}", new.id, new.version));
    }

    fn on_update(&self, old: &ObjectState, new: &ObjectState) {
        self.push(format!("update {}@{}->{}", new.id, old.version, new.version));
    }

    fn on_delete(&self, last: &ObjectState) {
        self.push(format!("delete {}@{}", last.id, last.version));
    }
}

/// Poll `cond` until it holds or a few seconds elapse.
pub async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
