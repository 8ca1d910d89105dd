//! Pod access
//!
//! The reconciler reads pods and writes back the network status annotation
//! through [`PodStore`], so passes can be exercised without an API server.

use crate::error::ControllerError;
use crate::model::WorkloadKey;
use crds::{NETWORK_STATUS_ANNOTATION, NETWORKS_ANNOTATION};
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Everything a pass needs to know about a pod, read once per attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadSnapshot {
    /// Pod namespace and name
    pub key: WorkloadKey,
    /// Pod UID, passed to plugins as `K8S_POD_UID`
    pub uid: String,
    /// Resource version the snapshot was read at
    pub resource_version: String,
    /// Node the pod is scheduled on
    pub node_name: Option<String>,
    /// Pod phase (`Running`, `Pending`, ...)
    pub phase: Option<String>,
    /// Deletion timestamp is set
    pub terminating: bool,
    /// Runtime ID of the first running container, scheme stripped
    pub container_id: Option<String>,
    /// Raw `networks` annotation
    pub desired_raw: Option<String>,
    /// Raw `network-status` annotation
    pub actual_raw: Option<String>,
}

impl WorkloadSnapshot {
    /// Build a snapshot from a pod object
    pub fn from_pod(pod: &Pod) -> Self {
        let annotations = pod.annotations();
        let status = pod.status.as_ref();

        let container_id = status
            .and_then(|status| status.container_statuses.as_ref())
            .and_then(|statuses| {
                statuses
                    .iter()
                    .filter(|status| status.state.as_ref().is_some_and(|state| state.running.is_some()))
                    .find_map(|status| status.container_id.as_deref())
            })
            .map(strip_runtime_scheme)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Self {
            key: WorkloadKey::new(pod.namespace().unwrap_or_default(), pod.name_any()),
            uid: pod.uid().unwrap_or_default(),
            resource_version: pod.resource_version().unwrap_or_default(),
            node_name: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
            phase: status.and_then(|status| status.phase.clone()),
            terminating: pod.metadata.deletion_timestamp.is_some(),
            container_id,
            desired_raw: annotations.get(NETWORKS_ANNOTATION).cloned(),
            actual_raw: annotations.get(NETWORK_STATUS_ANNOTATION).cloned(),
        }
    }

    /// Whether the pod is in the `Running` phase
    pub fn is_running(&self) -> bool {
        self.phase.as_deref() == Some("Running")
    }

    /// Reference used when attaching events to the pod
    pub fn object_ref(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Pod".to_string()),
            namespace: Some(self.key.namespace.clone()),
            name: Some(self.key.name.clone()),
            uid: Some(self.uid.clone()).filter(|uid| !uid.is_empty()),
            resource_version: Some(self.resource_version.clone()).filter(|rv| !rv.is_empty()),
            ..Default::default()
        }
    }
}

fn strip_runtime_scheme(id: &str) -> &str {
    id.split_once("://").map_or(id, |(_, id)| id)
}

/// Read and write access to pods.
#[async_trait::async_trait]
pub trait PodStore: Send + Sync {
    /// Read the current state of a pod.
    ///
    /// Fails with [`ControllerError::PodNotFound`] when the pod is gone.
    async fn get(&self, key: &WorkloadKey) -> Result<WorkloadSnapshot, ControllerError>;

    /// Replace the network status annotation, conditional on `resource_version`.
    ///
    /// Fails with [`ControllerError::VersionConflict`] when the pod changed
    /// since it was read.
    async fn patch_network_status(
        &self,
        key: &WorkloadKey,
        resource_version: &str,
        status: &str,
    ) -> Result<(), ControllerError>;
}

/// [`PodStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubePodStore {
    client: Client,
}

impl std::fmt::Debug for KubePodStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubePodStore").finish_non_exhaustive()
    }
}

impl KubePodStore {
    /// Create a store using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, key: &WorkloadKey) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &key.namespace)
    }
}

#[async_trait::async_trait]
impl PodStore for KubePodStore {
    async fn get(&self, key: &WorkloadKey) -> Result<WorkloadSnapshot, ControllerError> {
        match self.api(key).get_opt(&key.name).await? {
            Some(pod) => Ok(WorkloadSnapshot::from_pod(&pod)),
            None => Err(ControllerError::PodNotFound(key.to_string())),
        }
    }

    async fn patch_network_status(
        &self,
        key: &WorkloadKey,
        resource_version: &str,
        status: &str,
    ) -> Result<(), ControllerError> {
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version,
                "annotations": {
                    NETWORK_STATUS_ANNOTATION: status,
                },
            },
        });

        match self
            .api(key)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                debug!("Patched network status of pod {} at resourceVersion {}", key, resource_version);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(ControllerError::VersionConflict(format!(
                "pod {key} changed since resourceVersion {resource_version}"
            ))),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(ControllerError::PodNotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
