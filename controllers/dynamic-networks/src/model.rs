//! Normalized attachment state.
//!
//! Desired and actual state are rebuilt from the pod annotations on every
//! pass; nothing here is persisted on its own.

use crds::{NetworkRef, NetworkStatus};
use serde_json::{Map, Value};
use std::fmt;

/// Identifies a pod across passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadKey {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
}

impl WorkloadKey {
    /// Create a new key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identity of one logical attachment: the same network may be attached
/// several times under different interface names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    /// Attached network
    pub network: NetworkRef,
    /// Interface name inside the pod
    pub interface: String,
}

impl IdentityKey {
    /// Create a new identity key
    pub fn new(network: NetworkRef, interface: impl Into<String>) -> Self {
        Self {
            network,
            interface: interface.into(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.network, self.interface)
    }
}

/// One entry of desired state.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRequest {
    /// Requested network
    pub network: NetworkRef,
    /// Requested interface name; `None` leaves the request unresolved
    pub interface: Option<String>,
    /// Static IP requests
    pub ips: Vec<String>,
    /// Requested MAC address
    pub mac: Option<String>,
    /// Default-route gateways
    pub default_route: Vec<String>,
    /// Arguments handed to the plugin as `args.cni`
    pub cni_args: Option<Map<String, Value>>,
}

impl AttachmentRequest {
    /// Identity key, or `None` while the interface name is unresolved.
    pub fn key(&self) -> Option<IdentityKey> {
        self.interface
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(|name| IdentityKey::new(self.network.clone(), name))
    }
}

/// One live secondary attachment, as published in network status.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedInterface {
    /// Attached network
    pub network: NetworkRef,
    /// Interface name inside the pod
    pub interface: String,
    /// Published status entry, kept whole so unknown fields survive
    pub status: NetworkStatus,
}

impl AttachedInterface {
    /// Build an attachment whose status entry names the network in
    /// `namespace/name` form.
    pub fn new(network: NetworkRef, interface: impl Into<String>, ips: Vec<String>, mac: Option<String>) -> Self {
        let interface = interface.into();
        let status = NetworkStatus {
            name: network.to_string(),
            interface: Some(interface.clone()),
            ips,
            mac,
            ..Default::default()
        };
        Self {
            network,
            interface,
            status,
        }
    }

    /// Identity key of this attachment
    pub fn key(&self) -> IdentityKey {
        IdentityKey::new(self.network.clone(), self.interface.clone())
    }

    /// Assigned addresses
    pub fn ips(&self) -> &[String] {
        &self.status.ips
    }

    /// Hardware address
    pub fn mac(&self) -> Option<&str> {
        self.status.mac.as_deref()
    }
}

/// Everything the network status annotation says is wired into the pod.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActualState {
    /// Primary (cluster default) network entries, never diffed
    pub primary: Vec<NetworkStatus>,
    /// Secondary attachments
    pub attachments: Vec<AttachedInterface>,
}

impl ActualState {
    /// Total interface count, primary included
    pub fn interface_count(&self) -> usize {
        self.primary.len() + self.attachments.len()
    }

    /// Whether an attachment with `key` is present
    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.attachments.iter().any(|attached| &attached.key() == key)
    }

    /// Status entries in publication order: primary first.
    pub fn to_statuses(&self) -> Vec<NetworkStatus> {
        self.primary
            .iter()
            .cloned()
            .chain(self.attachments.iter().map(|attached| attached.status.clone()))
            .collect()
    }
}
