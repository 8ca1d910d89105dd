//! Controller-specific error types.
//!
//! This module defines the failure taxonomy of a reconcile pass and how
//! each kind is retried.

use cni_client::CniError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Dynamic Networks Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// CNI delegation error
    #[error("CNI error: {0}")]
    Cni(#[from] CniError),

    /// An annotation is not valid structured data or violates its schema
    #[error("Malformed annotation: {0}")]
    MalformedAnnotation(String),

    /// Desired state contains an attachment without an interface name
    #[error("Ambiguous desired state: {0}")]
    AmbiguousDesiredState(String),

    /// The pod has no usable network namespace right now
    #[error("Network namespace unavailable: {0}")]
    NamespaceUnavailable(String),

    /// The referenced NetworkAttachmentDefinition does not exist
    #[error("Network configuration not found: {0}")]
    NetworkConfigNotFound(String),

    /// A plugin chain failed to attach or detach an interface
    #[error("Attachment failed: {0}")]
    AttachmentFailed(String),

    /// The pod changed between read and write
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// The pod no longer exists
    #[error("Pod not found: {0}")]
    PodNotFound(String),

    /// The pass exceeded its deadline
    #[error("Reconcile pass timed out: {0}")]
    Timeout(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether the pod should be requeued with backoff.
    ///
    /// Non-retryable failures leave the pod idle until its next update.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(_)
            | Self::Cni(_)
            | Self::NamespaceUnavailable(_)
            | Self::NetworkConfigNotFound(_)
            | Self::AttachmentFailed(_)
            | Self::VersionConflict(_)
            | Self::Timeout(_) => true,
            Self::MalformedAnnotation(_)
            | Self::AmbiguousDesiredState(_)
            | Self::PodNotFound(_)
            | Self::InvalidConfig(_)
            | Self::Watch(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ControllerError::NamespaceUnavailable("pod pending".into()).is_retryable());
        assert!(ControllerError::VersionConflict("rv 12".into()).is_retryable());
        assert!(ControllerError::Timeout("60s".into()).is_retryable());
        assert!(!ControllerError::MalformedAnnotation("not json".into()).is_retryable());
        assert!(!ControllerError::AmbiguousDesiredState("unnamed".into()).is_retryable());
        assert!(!ControllerError::PodNotFound("ns1/pod".into()).is_retryable());
    }
}
