//! Test utilities for unit testing the reconciler
//!
//! In-memory stand-ins for the pod store, network definitions, namespace
//! locator and event recorder, plus builders for common pod shapes.

use crate::diff::DiffConfig;
use crate::error::ControllerError;
use crate::events::{EventSink, PodEventKind};
use crate::executor::AttachmentExecutor;
use crate::metrics::Metrics;
use crate::model::WorkloadKey;
use crate::namespace::{NamespaceHandle, NamespaceLocator, check_workload};
use crate::networks::NetworkConfigSource;
use crate::publisher::StatusPublisher;
use crate::reconciler::Reconciler;
use crate::store::{PodStore, WorkloadSnapshot};
use cni_client::MockCniClient;
use crds::NetworkRef;
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Node every test pod runs on
pub const NODE: &str = "worker-1";

/// Sandbox ID the mock locator reports
pub const SANDBOX_ID: &str = "9f2e7d0c4b1a";

/// Macvlan configuration used by most tests
pub const MACVLAN_CONFIG: &str = r#"{"cniVersion": "0.3.1", "type": "macvlan", "master": "eth0", "capabilities": {"ips": true, "mac": true}}"#;

/// Network status of a pod that only has its primary interface
pub const PRIMARY_ONLY_STATUS: &str = r#"[{"name": "kindnet", "interface": "eth0", "ips": ["10.244.1.5"], "mac": "0a:58:0a:f4:01:05", "default": true}]"#;

type ConflictMutation = Box<dyn FnOnce(&mut WorkloadSnapshot) + Send>;

/// Key of the default test pod
pub fn pod_key() -> WorkloadKey {
    WorkloadKey::new("ns1", "web-0")
}

/// A running pod on [`NODE`] with the given annotations
pub fn running_pod(desired: Option<&str>, actual: Option<&str>) -> WorkloadSnapshot {
    WorkloadSnapshot {
        key: pod_key(),
        uid: "2f6a1c3e-uid".to_string(),
        resource_version: "1".to_string(),
        node_name: Some(NODE.to_string()),
        phase: Some("Running".to_string()),
        terminating: false,
        container_id: Some("abc123".to_string()),
        desired_raw: desired.map(str::to_string),
        actual_raw: actual.map(str::to_string),
    }
}

/// The pod object a watch event would carry for `snapshot`
pub fn pod_object(snapshot: &WorkloadSnapshot) -> Pod {
    let mut annotations = serde_json::Map::new();
    if let Some(desired) = &snapshot.desired_raw {
        annotations.insert(crds::NETWORKS_ANNOTATION.to_string(), desired.clone().into());
    }
    if let Some(actual) = &snapshot.actual_raw {
        annotations.insert(crds::NETWORK_STATUS_ANNOTATION.to_string(), actual.clone().into());
    }
    let container_statuses: Vec<serde_json::Value> = snapshot
        .container_id
        .iter()
        .map(|id| {
            serde_json::json!({
                "name": "app",
                "ready": true,
                "restartCount": 0,
                "image": "registry.local/app:1",
                "imageID": "registry.local/app@sha256:00",
                "containerID": format!("containerd://{id}"),
                "state": {"running": {}}
            })
        })
        .collect();

    serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "namespace": snapshot.key.namespace,
            "name": snapshot.key.name,
            "uid": snapshot.uid,
            "resourceVersion": snapshot.resource_version,
            "annotations": annotations
        },
        "spec": {
            "nodeName": snapshot.node_name,
            "containers": [{"name": "app", "image": "registry.local/app:1"}]
        },
        "status": {
            "phase": snapshot.phase,
            "containerStatuses": container_statuses
        }
    }))
    .unwrap()
}

/// Namespace path the mock locator hands out for `snapshot`
pub fn netns_path(snapshot: &WorkloadSnapshot) -> PathBuf {
    PathBuf::from(format!("/var/run/netns/cni-{}", snapshot.uid))
}

#[derive(Default)]
struct PodStoreState {
    pods: HashMap<WorkloadKey, WorkloadSnapshot>,
    conflicts: VecDeque<ConflictMutation>,
    patches: Vec<(WorkloadKey, String)>,
}

/// In-memory [`PodStore`] with resourceVersion compare-and-swap.
#[derive(Clone, Default)]
pub struct MockPodStore {
    state: Arc<Mutex<PodStoreState>>,
}

impl MockPodStore {
    /// Create a store holding `pods`
    pub fn with_pods(pods: impl IntoIterator<Item = WorkloadSnapshot>) -> Self {
        let store = Self::default();
        for pod in pods {
            store.insert(pod);
        }
        store
    }

    /// Insert or replace a pod
    pub fn insert(&self, pod: WorkloadSnapshot) {
        self.state.lock().unwrap().pods.insert(pod.key.clone(), pod);
    }

    /// Current state of a pod
    pub fn pod(&self, key: &WorkloadKey) -> Option<WorkloadSnapshot> {
        self.state.lock().unwrap().pods.get(key).cloned()
    }

    /// Change a pod as another writer would, bumping its resourceVersion
    pub fn update(&self, key: &WorkloadKey, mutation: impl FnOnce(&mut WorkloadSnapshot)) {
        let mut state = self.state.lock().unwrap();
        let pod = state.pods.get_mut(key).unwrap();
        mutation(pod);
        bump(pod);
    }

    /// Make the next patch lose a race against a writer applying `mutation`
    pub fn conflict_once(&self, mutation: impl FnOnce(&mut WorkloadSnapshot) + Send + 'static) {
        self.state.lock().unwrap().conflicts.push_back(Box::new(mutation));
    }

    /// Every successful patch, in order
    pub fn patches(&self) -> Vec<(WorkloadKey, String)> {
        self.state.lock().unwrap().patches.clone()
    }
}

fn bump(pod: &mut WorkloadSnapshot) {
    let version: u64 = pod.resource_version.parse().unwrap_or(0);
    pod.resource_version = (version + 1).to_string();
}

#[async_trait::async_trait]
impl PodStore for MockPodStore {
    async fn get(&self, key: &WorkloadKey) -> Result<WorkloadSnapshot, ControllerError> {
        self.pod(key).ok_or_else(|| ControllerError::PodNotFound(key.to_string()))
    }

    async fn patch_network_status(
        &self,
        key: &WorkloadKey,
        resource_version: &str,
        status: &str,
    ) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        let conflict = state.conflicts.pop_front();
        let pod = state
            .pods
            .get_mut(key)
            .ok_or_else(|| ControllerError::PodNotFound(key.to_string()))?;

        if let Some(mutation) = conflict {
            mutation(pod);
            bump(pod);
        }
        if pod.resource_version != resource_version {
            return Err(ControllerError::VersionConflict(format!(
                "pod {key} is at resourceVersion {}, not {resource_version}",
                pod.resource_version
            )));
        }

        pod.actual_raw = Some(status.to_string());
        bump(pod);
        state.patches.push((key.clone(), status.to_string()));
        Ok(())
    }
}

/// In-memory [`NetworkConfigSource`].
#[derive(Clone, Default)]
pub struct MockNetworkConfigSource {
    configs: Arc<Mutex<HashMap<NetworkRef, String>>>,
}

impl MockNetworkConfigSource {
    /// Define `namespace/name` with `config`
    pub fn with_network(self, namespace: &str, name: &str, config: &str) -> Self {
        self.configs
            .lock()
            .unwrap()
            .insert(NetworkRef::new(namespace, name), config.to_string());
        self
    }

    /// Delete a definition
    pub fn remove(&self, namespace: &str, name: &str) {
        self.configs.lock().unwrap().remove(&NetworkRef::new(namespace, name));
    }
}

#[async_trait::async_trait]
impl NetworkConfigSource for MockNetworkConfigSource {
    async fn resolve(&self, network: &NetworkRef) -> Result<Option<String>, ControllerError> {
        Ok(self.configs.lock().unwrap().get(network).cloned())
    }
}

/// [`NamespaceLocator`] that never touches the filesystem.
///
/// The namespace survives a configurable number of liveness checks.
#[derive(Clone, Default)]
pub struct MockNamespaceLocator {
    checks_before_vanishing: Arc<Mutex<Option<usize>>>,
}

impl MockNamespaceLocator {
    /// Let the namespace vanish after `checks` successful liveness checks
    pub fn vanish_after(&self, checks: usize) {
        *self.checks_before_vanishing.lock().unwrap() = Some(checks);
    }
}

impl NamespaceLocator for MockNamespaceLocator {
    fn locate(&self, snapshot: &WorkloadSnapshot) -> Result<NamespaceHandle, ControllerError> {
        let container_id = check_workload(snapshot)?;
        Ok(NamespaceHandle {
            path: netns_path(snapshot),
            container_id: container_id.to_string(),
            sandbox_id: SANDBOX_ID.to_string(),
            pid: 4242,
        })
    }

    fn is_alive(&self, _handle: &NamespaceHandle) -> bool {
        let mut remaining = self.checks_before_vanishing.lock().unwrap();
        match remaining.as_mut() {
            None => true,
            Some(0) => false,
            Some(checks) => {
                *checks -= 1;
                true
            }
        }
    }
}

/// [`EventSink`] that keeps every event in memory.
#[derive(Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<(PodEventKind, String)>>>,
}

impl RecordingEventSink {
    /// Recorded events, in order
    pub fn events(&self) -> Vec<(PodEventKind, String)> {
        self.events.lock().unwrap().clone()
    }

    /// Recorded event kinds, in order
    pub fn kinds(&self) -> Vec<PodEventKind> {
        self.events().into_iter().map(|(kind, _)| kind).collect()
    }
}

#[async_trait::async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, _pod_ref: &ObjectReference, kind: PodEventKind, note: String) {
        self.events.lock().unwrap().push((kind, note));
    }
}

/// Every collaborator of a test reconciler, kept for assertions.
pub struct TestHarness {
    /// Pod store holding the test pod
    pub store: MockPodStore,
    /// CNI client tracking devices per namespace
    pub cni: MockCniClient,
    /// Network definitions
    pub networks: MockNetworkConfigSource,
    /// Namespace locator; can be told to let the namespace vanish
    pub locator: MockNamespaceLocator,
    /// Events published on the pod
    pub events: RecordingEventSink,
    /// Metrics shared with the reconciler
    pub metrics: Arc<Metrics>,
}

impl TestHarness {
    /// Harness around `pod` with `tenant-network` and `storage` defined in `ns1`
    pub fn new(pod: WorkloadSnapshot) -> Self {
        Self {
            store: MockPodStore::with_pods([pod]),
            cni: MockCniClient::new(),
            networks: MockNetworkConfigSource::default()
                .with_network("ns1", "tenant-network", MACVLAN_CONFIG)
                .with_network("ns1", "storage", MACVLAN_CONFIG),
            locator: MockNamespaceLocator::default(),
            events: RecordingEventSink::default(),
            metrics: Arc::new(Metrics::new().unwrap()),
        }
    }

    /// Executor wired to the mocks
    pub fn executor(&self) -> AttachmentExecutor {
        AttachmentExecutor::new(
            Arc::new(self.cni.clone()),
            Arc::new(self.networks.clone()),
            Arc::new(self.locator.clone()),
        )
    }

    /// Reconciler wired to the mocks
    pub fn reconciler(&self, diff_config: DiffConfig) -> Reconciler {
        let store: Arc<dyn PodStore> = Arc::new(self.store.clone());
        Reconciler {
            store: Arc::clone(&store),
            locator: Arc::new(self.locator.clone()),
            executor: self.executor(),
            publisher: StatusPublisher::new(store),
            events: Arc::new(self.events.clone()),
            metrics: Arc::clone(&self.metrics),
            node_name: NODE.to_string(),
            diff_config,
            conflict_retries: 3,
            pass_timeout: Duration::from_secs(60),
        }
    }

    /// Current state of the test pod
    pub fn pod(&self) -> WorkloadSnapshot {
        self.store.pod(&pod_key()).unwrap()
    }
}
