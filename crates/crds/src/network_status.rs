//! Network status entries
//!
//! One entry of the `k8s.v1.cni.cncf.io/network-status` annotation. Fields
//! this crate does not model (device info, for example) are kept verbatim so
//! that republishing an entry never drops data written by someone else.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Observed state of one interface inside a pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkStatus {
    /// Network in `namespace/name` form (the primary network may be bare)
    pub name: String,

    /// Interface name inside the pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    /// Assigned addresses, without prefix length
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,

    /// Hardware address of the interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    /// Marks the cluster default (primary) network
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,

    /// DNS settings reported by the plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<serde_json::Value>,

    /// Gateways reported by the plugin
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateway: Vec<String>,

    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
