//! Network namespace lookup
//!
//! Finds the network namespace of a running pod by reading the container
//! runtime's pid file for one of its containers, and the pod sandbox ID
//! from the OCI bundle next to it. Handles are resolved fresh on every pass
//! and never cached.

use crate::error::ControllerError;
use crate::store::WorkloadSnapshot;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Placeholder replaced by the container ID in pid file templates.
const CONTAINER_ID_PLACEHOLDER: &str = "{id}";

/// OCI annotations naming the pod sandbox (containerd, CRI-O).
const SANDBOX_ID_ANNOTATIONS: [&str; 2] = ["io.kubernetes.cri.sandbox-id", "io.kubernetes.cri-o.SandboxID"];

/// A located network namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceHandle {
    /// Path handed to plugins as `CNI_NETNS`
    pub path: PathBuf,
    /// Container whose task owns the namespace
    pub container_id: String,
    /// Pod sandbox the namespace belongs to; the CNI container ID
    pub sandbox_id: String,
    /// Init pid of that task
    pub pid: u32,
}

/// Resolves pods to their network namespaces.
pub trait NamespaceLocator: Send + Sync {
    /// Locate the namespace of `snapshot`.
    ///
    /// Fails with [`ControllerError::NamespaceUnavailable`] when the pod is
    /// not running, is terminating, or the runtime has no task for it.
    fn locate(&self, snapshot: &WorkloadSnapshot) -> Result<NamespaceHandle, ControllerError>;

    /// Whether the namespace behind `handle` still exists.
    fn is_alive(&self, handle: &NamespaceHandle) -> bool;
}

/// Check the pod-level preconditions shared by every locator.
pub fn check_workload(snapshot: &WorkloadSnapshot) -> Result<&str, ControllerError> {
    if snapshot.terminating {
        return Err(ControllerError::NamespaceUnavailable(format!(
            "pod {} is terminating",
            snapshot.key
        )));
    }
    if !snapshot.is_running() {
        return Err(ControllerError::NamespaceUnavailable(format!(
            "pod {} is in phase {}",
            snapshot.key,
            snapshot.phase.as_deref().unwrap_or("Unknown")
        )));
    }
    snapshot.container_id.as_deref().ok_or_else(|| {
        ControllerError::NamespaceUnavailable(format!("pod {} has no running container", snapshot.key))
    })
}

/// [`NamespaceLocator`] reading containerd and CRI-O state on the host.
#[derive(Debug, Clone)]
pub struct RuntimeNamespaceLocator {
    pid_files: Vec<String>,
    proc_root: PathBuf,
}

impl RuntimeNamespaceLocator {
    /// Create a locator
    ///
    /// # Arguments
    /// * `pid_files` - Pid file path templates containing `{id}`
    /// * `proc_root` - Mount point of the host's procfs
    pub fn new(pid_files: Vec<String>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            pid_files,
            proc_root: proc_root.into(),
        }
    }

    fn read_pid(&self, container_id: &str) -> Option<(u32, PathBuf)> {
        self.pid_files
            .iter()
            .map(|template| PathBuf::from(template.replace(CONTAINER_ID_PLACEHOLDER, container_id)))
            .find_map(|path| {
                let pid = std::fs::read_to_string(&path).ok()?.trim().parse::<u32>().ok()?;
                debug!("Container {} has init pid {} ({})", container_id, pid, path.display());
                Some((pid, path))
            })
    }

    fn netns_path(&self, pid: u32) -> PathBuf {
        self.proc_root.join(pid.to_string()).join("ns").join("net")
    }
}

impl NamespaceLocator for RuntimeNamespaceLocator {
    fn locate(&self, snapshot: &WorkloadSnapshot) -> Result<NamespaceHandle, ControllerError> {
        let container_id = check_workload(snapshot)?;
        if container_id_is_unsafe(container_id) {
            return Err(ControllerError::NamespaceUnavailable(format!(
                "pod {} reports an invalid container ID",
                snapshot.key
            )));
        }

        let (pid, pid_file) = self.read_pid(container_id).ok_or_else(|| {
            ControllerError::NamespaceUnavailable(format!(
                "no runtime task state for container {container_id} of pod {}",
                snapshot.key
            ))
        })?;
        let sandbox_id = pid_file.parent().and_then(read_sandbox_id).ok_or_else(|| {
            ControllerError::NamespaceUnavailable(format!(
                "bundle of container {container_id} of pod {} names no sandbox",
                snapshot.key
            ))
        })?;

        let path = self.netns_path(pid);
        if !path.exists() {
            return Err(ControllerError::NamespaceUnavailable(format!(
                "process {pid} of pod {} has exited",
                snapshot.key
            )));
        }

        Ok(NamespaceHandle {
            path,
            container_id: container_id.to_string(),
            sandbox_id,
            pid,
        })
    }

    fn is_alive(&self, handle: &NamespaceHandle) -> bool {
        handle.path.exists() && self.read_pid(&handle.container_id).map(|(pid, _)| pid) == Some(handle.pid)
    }
}

/// Sandbox ID from the `config.json` of the bundle in `dir`.
fn read_sandbox_id(dir: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(dir.join("config.json")).ok()?;
    let spec: serde_json::Value = serde_json::from_str(&raw).ok()?;
    let annotations = spec.get("annotations")?;
    SANDBOX_ID_ANNOTATIONS
        .iter()
        .find_map(|key| annotations.get(*key)?.as_str())
        .filter(|id| !id.is_empty() && !container_id_is_unsafe(id))
        .map(str::to_string)
}

fn container_id_is_unsafe(container_id: &str) -> bool {
    container_id.contains('/') || container_id.contains("..") || Path::new(container_id).is_absolute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkloadKey;

    struct Host {
        root: PathBuf,
    }

    impl Host {
        fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(format!("dynamic-networks-{name}-{}", std::process::id()));
            let _ = std::fs::remove_dir_all(&root);
            std::fs::create_dir_all(&root).unwrap();
            Self { root }
        }

        fn locator(&self) -> RuntimeNamespaceLocator {
            RuntimeNamespaceLocator::new(
                vec![
                    format!("{}/containerd/{{id}}/init.pid", self.root.display()),
                    format!("{}/crio/{{id}}/userdata/pidfile", self.root.display()),
                ],
                self.root.join("proc"),
            )
        }

        fn start_task(&self, layout: &str, container_id: &str, pid: u32) {
            let (pid_file, annotation) = match layout {
                "containerd" => (
                    self.root.join("containerd").join(container_id).join("init.pid"),
                    "io.kubernetes.cri.sandbox-id",
                ),
                _ => (
                    self.root.join("crio").join(container_id).join("userdata").join("pidfile"),
                    "io.kubernetes.cri-o.SandboxID",
                ),
            };
            let bundle = pid_file.parent().unwrap();
            std::fs::create_dir_all(bundle).unwrap();
            std::fs::write(&pid_file, format!("{pid}\n")).unwrap();
            let config = serde_json::json!({"ociVersion": "1.1.0", "annotations": {annotation: format!("sandbox-{container_id}")}});
            std::fs::write(bundle.join("config.json"), config.to_string()).unwrap();

            let ns_dir = self.root.join("proc").join(pid.to_string()).join("ns");
            std::fs::create_dir_all(&ns_dir).unwrap();
            std::fs::write(ns_dir.join("net"), "").unwrap();
        }

        fn exit_process(&self, pid: u32) {
            std::fs::remove_dir_all(self.root.join("proc").join(pid.to_string())).unwrap();
        }
    }

    impl Drop for Host {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn snapshot(container_id: Option<&str>) -> WorkloadSnapshot {
        WorkloadSnapshot {
            key: WorkloadKey::new("ns1", "web-0"),
            uid: "uid-1".to_string(),
            phase: Some("Running".to_string()),
            container_id: container_id.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_locate_containerd_task() {
        let host = Host::new("containerd");
        host.start_task("containerd", "abc123", 4242);

        let handle = host.locator().locate(&snapshot(Some("abc123"))).unwrap();
        assert_eq!(handle.pid, 4242);
        assert_eq!(handle.sandbox_id, "sandbox-abc123");
        assert!(handle.path.ends_with("proc/4242/ns/net"));
        assert!(host.locator().is_alive(&handle));
    }

    #[test]
    fn test_locate_crio_task() {
        let host = Host::new("crio");
        host.start_task("crio", "def456", 777);

        let handle = host.locator().locate(&snapshot(Some("def456"))).unwrap();
        assert_eq!(handle.pid, 777);
        assert_eq!(handle.sandbox_id, "sandbox-def456");
    }

    #[test]
    fn test_bundle_without_sandbox_annotation_is_unavailable() {
        let host = Host::new("no-sandbox");
        host.start_task("containerd", "abc123", 4242);
        std::fs::write(
            host.root.join("containerd").join("abc123").join("config.json"),
            r#"{"ociVersion": "1.1.0", "annotations": {}}"#,
        )
        .unwrap();

        let result = host.locator().locate(&snapshot(Some("abc123")));
        assert!(matches!(result, Err(ControllerError::NamespaceUnavailable(_))));
    }

    #[test]
    fn test_missing_task_state_is_unavailable() {
        let host = Host::new("missing");
        let result = host.locator().locate(&snapshot(Some("recreated")));
        assert!(matches!(result, Err(ControllerError::NamespaceUnavailable(_))));
    }

    #[test]
    fn test_pod_preconditions() {
        let host = Host::new("preconditions");
        host.start_task("containerd", "abc123", 4242);
        let locator = host.locator();

        let mut pending = snapshot(Some("abc123"));
        pending.phase = Some("Pending".to_string());
        assert!(matches!(locator.locate(&pending), Err(ControllerError::NamespaceUnavailable(_))));

        let mut terminating = snapshot(Some("abc123"));
        terminating.terminating = true;
        assert!(matches!(locator.locate(&terminating), Err(ControllerError::NamespaceUnavailable(_))));

        assert!(matches!(locator.locate(&snapshot(None)), Err(ControllerError::NamespaceUnavailable(_))));
        assert!(matches!(
            locator.locate(&snapshot(Some("../../etc"))),
            Err(ControllerError::NamespaceUnavailable(_))
        ));
    }

    #[test]
    fn test_exited_process_is_not_alive() {
        let host = Host::new("exited");
        host.start_task("containerd", "abc123", 4242);
        let locator = host.locator();
        let handle = locator.locate(&snapshot(Some("abc123"))).unwrap();

        host.exit_process(4242);
        assert!(!locator.is_alive(&handle));
        assert!(matches!(
            locator.locate(&snapshot(Some("abc123"))),
            Err(ControllerError::NamespaceUnavailable(_))
        ));
    }

    #[test]
    fn test_restarted_task_is_not_alive() {
        let host = Host::new("restarted");
        host.start_task("containerd", "abc123", 4242);
        let locator = host.locator();
        let handle = locator.locate(&snapshot(Some("abc123"))).unwrap();

        host.start_task("containerd", "abc123", 5000);
        assert!(!locator.is_alive(&handle));
    }
}
