//! Network configuration lookup
//!
//! Resolves a [`NetworkRef`] to the CNI configuration stored in its
//! `NetworkAttachmentDefinition`.

use crate::error::ControllerError;
use crds::{NetworkAttachmentDefinition, NetworkRef};
use kube::api::Api;
use kube::Client;

/// Source of CNI network configurations.
#[async_trait::async_trait]
pub trait NetworkConfigSource: Send + Sync {
    /// Raw CNI configuration for `network`.
    ///
    /// Returns `Ok(None)` when the definition does not exist or carries no
    /// inline configuration.
    async fn resolve(&self, network: &NetworkRef) -> Result<Option<String>, ControllerError>;
}

/// [`NetworkConfigSource`] reading `NetworkAttachmentDefinition` objects.
#[derive(Clone)]
pub struct KubeNetworkConfigSource {
    client: Client,
}

impl std::fmt::Debug for KubeNetworkConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeNetworkConfigSource").finish_non_exhaustive()
    }
}

impl KubeNetworkConfigSource {
    /// Create a source using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl NetworkConfigSource for KubeNetworkConfigSource {
    async fn resolve(&self, network: &NetworkRef) -> Result<Option<String>, ControllerError> {
        let api: Api<NetworkAttachmentDefinition> = Api::namespaced(self.client.clone(), &network.namespace);
        let definition = api.get_opt(&network.name).await?;
        Ok(definition.and_then(|definition| definition.cni_config().map(str::to_string)))
    }
}
