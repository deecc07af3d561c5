//! Mirador transport: list/watch access to one remote resource collection.
//!
//! The [`ListWatch`] trait is the seam between the reflector and the API
//! server. The production implementation ([`KubeListWatch`]) speaks to a
//! Kubernetes cluster; tests script the trait directly.

#![forbid(unsafe_code)]

use futures::stream::BoxStream;
use mirador_core::{ObjectState, ResourceVersion};

mod kube;

pub use self::kube::KubeListWatch;

/// Raw observation from the transport, before any cache application.
#[derive(Debug, Clone)]
pub enum RawEvent {
    Added(ObjectState),
    Modified(ObjectState),
    Deleted(ObjectState),
}

impl RawEvent {
    pub fn object(&self) -> &ObjectState {
        match self {
            RawEvent::Added(o) | RawEvent::Modified(o) | RawEvent::Deleted(o) => o,
        }
    }
}

/// Result of a full list: the matching objects plus the collection version
/// a subsequent watch resumes from.
#[derive(Debug, Clone)]
pub struct ListSnapshot {
    pub objects: Vec<ObjectState>,
    pub resource_version: ResourceVersion,
}

/// Transport failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Transient failure; the caller retries with backoff.
    #[error("connection error: {0}")]
    Connection(String),

    /// The requested resume version is no longer served; a full re-list is
    /// the only way forward.
    #[error("resource version expired")]
    VersionExpired,

    /// Credentials rejected. Not retriable.
    #[error("authentication failed: {0}")]
    Auth(String),
}

/// An unbounded, interruptible sequence of change events.
pub type EventStream = BoxStream<'static, Result<RawEvent, TransportError>>;

/// List/Watch access to one resource collection, already scoped by
/// namespace and label selector at construction time.
#[async_trait::async_trait]
pub trait ListWatch: Send + Sync {
    /// Fetch the full current state of the collection.
    async fn list(&self) -> Result<ListSnapshot, TransportError>;

    /// Open a watch starting just after `from`. The stream ends when the
    /// server closes the connection; it never silently restarts.
    async fn watch(&self, from: &ResourceVersion) -> Result<EventStream, TransportError>;
}
