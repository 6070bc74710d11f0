//! Kubernetes events recorded against target claims.
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! the reconciliation that produced it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

/// Controller name reported on published events.
pub const CONTROLLER_NAME: &str = "volclone-clone-controller";

/// Event reasons.
pub mod reasons {
    /// The clone finished and the source pod was removed.
    pub const CLONE_SUCCEEDED: &str = "CloneSucceeded";
    /// The clone-source pod was created.
    pub const CLONE_SOURCE_CREATED: &str = "CloneSourcePodCreated";
    /// The clone request cannot proceed until the claim is corrected.
    pub const CLONE_FAILED: &str = "CloneFailed";
}

/// Message attached to the success event.
pub const CLONE_SUCCEEDED_MESSAGE: &str = "Clone Successful";

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Expected progress.
    Normal,
    /// Something needs attention.
    Warning,
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Normal => Self::Normal,
            EventKind::Warning => Self::Warning,
        }
    }
}

/// Records events against claims.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record an event on `claim`.
    async fn record(&self, claim: &PersistentVolumeClaim, kind: EventKind, reason: &str, message: &str);
}

/// [`EventSink`] publishing through the Kubernetes events API.
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    /// Create a sink reporting as [`CONTROLLER_NAME`].
    #[must_use]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record(
        &self,
        claim: &PersistentVolumeClaim,
        kind: EventKind,
        reason: &str,
        message: &str,
    ) {
        let event = Event {
            type_: kind.into(),
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &claim.object_ref(&())).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// An event captured by [`MemoryEventSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// `namespace/name` of the claim.
    pub claim: String,
    /// Severity.
    pub kind: EventKind,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
}

/// [`EventSink`] that keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: parking_lot::Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn record(
        &self,
        claim: &PersistentVolumeClaim,
        kind: EventKind,
        reason: &str,
        message: &str,
    ) {
        let key = format!(
            "{}/{}",
            claim.metadata.namespace.as_deref().unwrap_or_default(),
            claim.metadata.name.as_deref().unwrap_or_default()
        );
        self.events.lock().push(RecordedEvent {
            claim: key,
            kind,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
