//! Kubernetes Event recording
//!
//! Events are fire-and-forget: a failed event is logged and never fails
//! the pass that emitted it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Name reported as the event source.
pub const CONTROLLER_NAME: &str = "dynamic-networks-controller";

/// What happened to a pod's attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodEventKind {
    /// An interface was hot-plugged
    AddedInterface,
    /// An interface was removed
    RemovedInterface,
    /// An attach or detach failed
    AttachmentFailed,
    /// An annotation could not be parsed
    MalformedAnnotation,
}

impl PodEventKind {
    /// Reason string shown by `kubectl get events`
    pub fn reason(self) -> &'static str {
        match self {
            Self::AddedInterface => "AddedInterface",
            Self::RemovedInterface => "RemovedInterface",
            Self::AttachmentFailed => "AttachmentFailed",
            Self::MalformedAnnotation => "MalformedAnnotation",
        }
    }

    /// Whether this is a `Warning` event
    pub fn is_warning(self) -> bool {
        matches!(self, Self::AttachmentFailed | Self::MalformedAnnotation)
    }
}

/// Publishes events about pods.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record `kind` with a human-readable `note` on the pod behind `pod_ref`.
    async fn publish(&self, pod_ref: &ObjectReference, kind: PodEventKind, note: String);
}

/// [`EventSink`] backed by `kube::runtime::events::Recorder`.
pub struct KubeEventSink {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventSink").finish_non_exhaustive()
    }
}

impl KubeEventSink {
    /// Create a sink reporting as `instance` (usually the node name)
    pub fn new(client: Client, instance: &str) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: Some(instance.to_string()),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, pod_ref: &ObjectReference, kind: PodEventKind, note: String) {
        let event = Event {
            type_: if kind.is_warning() {
                EventType::Warning
            } else {
                EventType::Normal
            },
            reason: kind.reason().to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, pod_ref).await {
            warn!(reason = kind.reason(), error = %e, "Failed to publish Kubernetes event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kinds() {
        assert_eq!(PodEventKind::AddedInterface.reason(), "AddedInterface");
        assert!(!PodEventKind::RemovedInterface.is_warning());
        assert!(PodEventKind::AttachmentFailed.is_warning());
        assert!(PodEventKind::MalformedAnnotation.is_warning());
    }
}
