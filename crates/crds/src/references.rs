//! Namespaced references to `NetworkAttachmentDefinition` objects
//!
//! Network status entries name their network as `namespace/name`; selection
//! elements carry the two parts separately, with the namespace defaulting to
//! the pod's own.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a `NetworkAttachmentDefinition` by namespace and name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRef {
    /// Namespace of the network attachment definition
    pub namespace: String,

    /// Name of the network attachment definition
    pub name: String,
}

impl NetworkRef {
    /// Create a new reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse the `namespace/name` form used by network status entries.
    ///
    /// A bare `name` resolves to `default_namespace`. Returns `None` when
    /// either part is empty or there is more than one separator.
    pub fn parse_qualified(value: &str, default_namespace: &str) -> Option<Self> {
        let value = value.trim();
        let (namespace, name) = match value.split_once('/') {
            Some((namespace, name)) => (namespace, name),
            None => (default_namespace, value),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for NetworkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
