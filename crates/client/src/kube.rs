//! Kubernetes-backed transport: GVK discovery plus raw list/watch calls.

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use kube::{
    api::{Api, ListParams, WatchEvent, WatchParams},
    core::{ApiResource, DynamicObject, ErrorResponse, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use mirador_core::{LabelSelector, ObjectState, ResourceVersion};
use tracing::{debug, info, warn};

use crate::{EventStream, ListSnapshot, ListWatch, RawEvent, TransportError};

/// Production [`ListWatch`] against a cluster, scoped to one GVK, an
/// optional namespace and a label selector.
pub struct KubeListWatch {
    api: Api<DynamicObject>,
    list_params: ListParams,
    watch_params: WatchParams,
}

impl KubeListWatch {
    /// Connect with ambient config (kubeconfig or in-cluster) and resolve
    /// `gvk_key` through discovery. Failures here are setup errors: the
    /// caller surfaces them and exits rather than retrying.
    pub async fn connect(
        gvk_key: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("loading cluster configuration")?;
        let gvk = parse_gvk_key(gvk_key)?;
        let (ar, namespaced) = find_api_resource(client.clone(), &gvk).await?;

        let api: Api<DynamicObject> = if namespaced {
            match namespace {
                Some(ns) => Api::namespaced_with(client, ns, &ar),
                None => Api::all_with(client, &ar),
            }
        } else {
            Api::all_with(client, &ar)
        };

        let mut list_params = ListParams::default();
        let mut watch_params = WatchParams::default();
        if let Some(labels) = selector.to_query() {
            list_params = list_params.labels(&labels);
            watch_params = watch_params.labels(&labels);
        }

        info!(gvk = %gvk_key, ns = ?namespace, selector = %selector, "transport ready");
        Ok(Self { api, list_params, watch_params })
    }
}

#[async_trait::async_trait]
impl ListWatch for KubeListWatch {
    async fn list(&self) -> Result<ListSnapshot, TransportError> {
        let list = self.api.list(&self.list_params).await.map_err(map_kube_error)?;
        let resource_version = list
            .metadata
            .resource_version
            .clone()
            .map(ResourceVersion::from)
            .ok_or_else(|| {
                TransportError::Connection("list response missing resourceVersion".to_string())
            })?;

        let mut objects = Vec::with_capacity(list.items.len());
        for item in list.items {
            match shape(item) {
                Ok(state) => objects.push(state),
                Err(err) => warn!(error = %err, "skipping malformed list item"),
            }
        }
        debug!(count = objects.len(), version = %resource_version, "list complete");
        Ok(ListSnapshot { objects, resource_version })
    }

    async fn watch(&self, from: &ResourceVersion) -> Result<EventStream, TransportError> {
        let stream = self
            .api
            .watch(&self.watch_params, from.as_str())
            .await
            .map_err(map_kube_error)?;

        let stream = stream.filter_map(|event| async move {
            match event {
                Ok(WatchEvent::Added(obj)) => Some(shape(obj).map(RawEvent::Added)),
                Ok(WatchEvent::Modified(obj)) => Some(shape(obj).map(RawEvent::Modified)),
                Ok(WatchEvent::Deleted(obj)) => Some(shape(obj).map(RawEvent::Deleted)),
                Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(er)) => Some(Err(map_error_response(er))),
                Err(err) => Some(Err(map_kube_error(err))),
            }
        });
        Ok(stream.boxed())
    }
}

fn shape(obj: DynamicObject) -> Result<ObjectState, TransportError> {
    let raw = serde_json::to_value(&obj)
        .map_err(|e| TransportError::Connection(format!("serializing object: {}", e)))?;
    ObjectState::from_raw(raw)
        .map_err(|e| TransportError::Connection(format!("malformed object: {}", e)))
}

fn map_kube_error(err: kube::Error) -> TransportError {
    match err {
        kube::Error::Api(er) => map_error_response(er),
        kube::Error::Auth(e) => TransportError::Auth(e.to_string()),
        other => TransportError::Connection(other.to_string()),
    }
}

fn map_error_response(er: ErrorResponse) -> TransportError {
    match er.code {
        // HTTP GONE: the resume window moved past our cursor.
        410 => TransportError::VersionExpired,
        401 => TransportError::Auth(er.message),
        _ => TransportError::Connection(format!("api error {}: {}", er.code, er.message)),
    }
}

fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind {
            group: String::new(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        [group, version, kind] => Ok(GroupVersionKind {
            group: (*group).to_string(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not served: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}
