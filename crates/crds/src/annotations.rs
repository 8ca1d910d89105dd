//! Pod annotation keys used by the network plumbing working group.

/// Desired attachments, written by operators or other tooling.
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// Attachments currently wired into the pod, written by the controller.
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";

/// API group of `NetworkAttachmentDefinition`.
pub const NETWORK_ATTACHMENT_GROUP: &str = "k8s.cni.cncf.io";
