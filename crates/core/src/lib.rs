//! Mirador core types: object identity, resource versions and change events.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Label pairs as carried on an object. Most objects hold only a handful.
pub type LabelSet = SmallVec<[(String, String); 8]>;

/// Identity of a watched object: namespace (when namespaced) plus name.
///
/// Stable across updates; the map key of the local store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: Some(namespace.into()), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self { namespace: None, name: name.into() }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Opaque, server-assigned version token.
///
/// Strictly increasing per identity across observed events. Ordering across
/// identities carries no meaning and the token must not be interpreted,
/// except for the best-effort resume gate in [`ResourceVersion::is_newer_than`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    pub fn new(v: impl Into<String>) -> Self {
        Self(v.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Best-effort "strictly newer" check used to discard redelivered events
    /// after a watch resume. Numeric comparison when both tokens parse as
    /// integers, inequality fallback otherwise.
    pub fn is_newer_than(&self, other: &ResourceVersion) -> bool {
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            (Ok(a), Ok(b)) => a > b,
            _ => self.0 != other.0,
        }
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceVersion {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

impl From<String> for ResourceVersion {
    fn from(v: String) -> Self {
        Self(v)
    }
}

/// Errors while shaping a raw object into an [`ObjectState`].
#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    #[error("object missing metadata.name")]
    MissingName,
    #[error("object missing metadata.resourceVersion")]
    MissingVersion,
}

/// A versioned, immutable snapshot of one remote object.
///
/// Entries in the store are swapped by reference and never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectState {
    pub id: ObjectRef,
    /// Server-assigned UID, carried as an opaque string when present.
    pub uid: Option<String>,
    pub version: ResourceVersion,
    pub labels: LabelSet,
    /// Creation timestamp as unix seconds; 0 when absent or unparsable.
    pub creation_ts: i64,
    /// Raw object payload, `metadata.managedFields` stripped.
    pub raw: serde_json::Value,
}

impl ObjectState {
    /// Shape a raw JSON object into a snapshot. Strips `managedFields`.
    pub fn from_raw(mut raw: serde_json::Value) -> Result<Self, ShapeError> {
        if let Some(meta) = raw.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.remove("managedFields");
        }
        let meta = raw.get("metadata");
        let name = meta
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .ok_or(ShapeError::MissingName)?
            .to_string();
        let namespace = meta
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let version = meta
            .and_then(|m| m.get("resourceVersion"))
            .and_then(|v| v.as_str())
            .map(ResourceVersion::from)
            .ok_or(ShapeError::MissingVersion)?;
        let uid = meta
            .and_then(|m| m.get("uid"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let creation_ts = meta
            .and_then(|m| m.get("creationTimestamp"))
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or(0);
        let labels: LabelSet = meta
            .and_then(|m| m.get("labels"))
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { id: ObjectRef { namespace, name }, uid, version, labels, creation_ts, raw })
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Equality-based label selector, rendered as `k=v,k2=v2` on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    pairs: BTreeMap<String, String>,
}

/// Errors while parsing a `k=v[,k=v...]` selector string.
#[derive(Debug, thiserror::Error)]
#[error("invalid selector term {0:?} (expect key=value)")]
pub struct SelectorParseError(pub String);

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style equality requirement.
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.insert(key.into(), value.into());
        self
    }

    /// Parse `k=v,k2=v2`. An empty string yields the match-all selector.
    pub fn parse(s: &str) -> Result<Self, SelectorParseError> {
        let mut sel = Self::new();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match term.split_once('=') {
                Some((k, v)) if !k.is_empty() => {
                    sel.pairs.insert(k.trim().to_string(), v.trim().to_string());
                }
                _ => return Err(SelectorParseError(term.to_string())),
            }
        }
        Ok(sel)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// True when every required pair is present in `labels`.
    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.pairs
            .iter()
            .all(|(k, v)| labels.iter().any(|(lk, lv)| lk == k && lv == v))
    }

    /// Wire form for list/watch params; `None` when the selector is empty.
    pub fn to_query(&self) -> Option<String> {
        if self.pairs.is_empty() {
            return None;
        }
        let joined = self
            .pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        Some(joined)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query().unwrap_or_default())
    }
}

/// A single observed change, produced by the reflector or resync and
/// consumed by the dispatcher.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Added(Arc<ObjectState>),
    Updated { old: Arc<ObjectState>, new: Arc<ObjectState> },
    /// Carries the last-known state of the removed object.
    Deleted(Arc<ObjectState>),
}

impl ChangeEvent {
    /// The affected object; for updates, the new state.
    pub fn object(&self) -> &Arc<ObjectState> {
        match self {
            ChangeEvent::Added(o) | ChangeEvent::Deleted(o) => o,
            ChangeEvent::Updated { new, .. } => new,
        }
    }

    pub fn version(&self) -> &ResourceVersion {
        &self.object().version
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Added(_) => "added",
            ChangeEvent::Updated { .. } => "updated",
            ChangeEvent::Deleted(_) => "deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn object_ref_display() {
        assert_eq!(ObjectRef::namespaced("default", "cfg").to_string(), "default/cfg");
        assert_eq!(ObjectRef::cluster("node-1").to_string(), "node-1");
    }

    #[test]
    fn version_numeric_ordering() {
        let v10 = ResourceVersion::from("10");
        let v9 = ResourceVersion::from("9");
        assert!(v10.is_newer_than(&v9));
        assert!(!v9.is_newer_than(&v10));
        assert!(!v10.is_newer_than(&v10));
    }

    #[test]
    fn version_opaque_fallback() {
        let a = ResourceVersion::from("abc");
        let b = ResourceVersion::from("abd");
        // Non-numeric tokens only support inequality.
        assert!(a.is_newer_than(&b));
        assert!(!a.is_newer_than(&a));
    }

    #[test]
    fn selector_render_is_sorted_and_stable() {
        let sel = LabelSelector::new().equals("type", "faas-wasm").equals("runtime", "wasm");
        assert_eq!(sel.to_query().as_deref(), Some("runtime=wasm,type=faas-wasm"));
        assert_eq!(LabelSelector::new().to_query(), None);
    }

    #[test]
    fn selector_parse_roundtrip() {
        let sel = LabelSelector::parse("runtime=wasm, type=faas-wasm").unwrap();
        assert_eq!(sel.to_query().as_deref(), Some("runtime=wasm,type=faas-wasm"));
        assert!(LabelSelector::parse("").unwrap().is_empty());
        assert!(LabelSelector::parse("novalue").is_err());
        assert!(LabelSelector::parse("=x").is_err());
    }

    #[test]
    fn selector_matches_subset() {
        let sel = LabelSelector::new().equals("runtime", "wasm");
        assert!(sel.matches(&labels(&[("runtime", "wasm"), ("type", "faas-wasm")])));
        assert!(!sel.matches(&labels(&[("runtime", "native")])));
        assert!(LabelSelector::new().matches(&labels(&[])));
    }

    #[test]
    fn shape_from_raw() {
        let raw = serde_json::json!({
            "metadata": {
                "name": "cfg",
                "namespace": "default",
                "uid": "0000-1111",
                "resourceVersion": "42",
                "creationTimestamp": "2020-01-01T00:00:00Z",
                "labels": {"runtime": "wasm"},
                "managedFields": [{"manager": "kubectl"}],
            },
            "data": {"k": "v"},
        });
        let state = ObjectState::from_raw(raw).unwrap();
        assert_eq!(state.id, ObjectRef::namespaced("default", "cfg"));
        assert_eq!(state.uid.as_deref(), Some("0000-1111"));
        assert_eq!(state.version.as_str(), "42");
        assert_eq!(state.label("runtime"), Some("wasm"));
        assert!(state.creation_ts > 0);
        assert!(state.raw["metadata"].get("managedFields").is_none());
    }

    #[test]
    fn shape_rejects_incomplete_metadata() {
        assert!(matches!(
            ObjectState::from_raw(serde_json::json!({"metadata": {"resourceVersion": "1"}})),
            Err(ShapeError::MissingName)
        ));
        assert!(matches!(
            ObjectState::from_raw(serde_json::json!({"metadata": {"name": "x"}})),
            Err(ShapeError::MissingVersion)
        ));
    }
}
