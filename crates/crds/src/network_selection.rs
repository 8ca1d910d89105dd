//! Network selection elements
//!
//! One entry of the `k8s.v1.cni.cncf.io/networks` annotation when it is
//! written in its JSON form. Unknown fields are ignored so newer writers do
//! not break older controllers.

use serde::{Deserialize, Serialize};

/// A requested attachment of a pod to a network.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkSelectionElement {
    /// Name of the NetworkAttachmentDefinition
    pub name: String,

    /// Namespace of the NetworkAttachmentDefinition (defaults to the pod's)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Interface name to create inside the pod
    #[serde(rename = "interface", default, skip_serializing_if = "Option::is_none")]
    pub interface_request: Option<String>,

    /// Static IP requests, each `address[/prefix]`
    #[serde(rename = "ips", default, skip_serializing_if = "Option::is_none")]
    pub ip_request: Option<Vec<String>>,

    /// Requested MAC address
    #[serde(rename = "mac", default, skip_serializing_if = "Option::is_none")]
    pub mac_request: Option<String>,

    /// Gateways to install as default routes through this interface
    #[serde(rename = "default-route", default, skip_serializing_if = "Option::is_none")]
    pub gateway_request: Option<Vec<String>>,

    /// Free-form arguments passed to the plugin as `args.cni`
    #[serde(rename = "cni-args", default, skip_serializing_if = "Option::is_none")]
    pub cni_args: Option<serde_json::Map<String, serde_json::Value>>,
}
