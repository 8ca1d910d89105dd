//! NetworkAttachmentDefinition CRD
//!
//! Names a CNI configuration (single plugin or plugin list) that pods can
//! request through the networks annotation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    shortname = "net-attach-def",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachmentDefinitionSpec {
    /// Raw CNI configuration JSON
    ///
    /// An absent or empty config means the definition points at a file on
    /// the node, which the dynamic controller does not resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

impl NetworkAttachmentDefinition {
    /// Returns the inline CNI configuration, if one is set and non-blank.
    pub fn cni_config(&self) -> Option<&str> {
        self.spec
            .config
            .as_deref()
            .map(str::trim)
            .filter(|config| !config.is_empty())
    }
}
