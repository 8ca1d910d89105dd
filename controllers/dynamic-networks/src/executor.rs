//! Attachment executor
//!
//! Applies diff operations to a pod's network namespace through the CNI
//! plugin chain of each network. Operations are independent: one failing
//! never stops the others, and every outcome is reported per identity key.
//! Every plugin call is bounded by the deadline of the pass; an ADD cut off
//! by it is undone with a DEL.

use crate::diff::Operation;
use crate::error::ControllerError;
use crate::model::{AttachedInterface, AttachmentRequest, IdentityKey};
use crate::namespace::{NamespaceHandle, NamespaceLocator};
use crate::networks::NetworkConfigSource;
use crate::store::WorkloadSnapshot;
use cni_client::{CniClientTrait, CniRequest, CniResult, NetworkConfigList, RuntimeConfig};
use crds::NetworkRef;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Result of a single operation.
#[derive(Debug)]
pub enum OperationOutcome {
    /// The interface is wired and reported like this
    Added(AttachedInterface),
    /// The interface is gone
    Removed,
    /// The operation failed; nothing was left behind
    Failed(ControllerError),
    /// Skipped because the namespace disappeared
    Aborted,
}

/// Outcomes of one or more executions, keyed by identity.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Outcome per identity key, in execution order
    pub results: Vec<(IdentityKey, OperationOutcome)>,
    /// The namespace vanished while operations were running
    pub namespace_lost: bool,
}

impl ExecutionReport {
    /// Record the outcome for `key`, replacing an earlier one.
    pub fn record(&mut self, key: IdentityKey, outcome: OperationOutcome) {
        match self.results.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, existing)) => *existing = outcome,
            None => self.results.push((key, outcome)),
        }
    }

    /// Fold a later execution into this one.
    pub fn merge(&mut self, other: ExecutionReport) {
        self.namespace_lost |= other.namespace_lost;
        for (key, outcome) in other.results {
            self.record(key, outcome);
        }
    }

    /// Outcome recorded for `key`
    pub fn outcome(&self, key: &IdentityKey) -> Option<&OperationOutcome> {
        self.results
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, outcome)| outcome)
    }

    /// Interfaces attached successfully
    pub fn added(&self) -> impl Iterator<Item = &AttachedInterface> {
        self.results.iter().filter_map(|(_, outcome)| match outcome {
            OperationOutcome::Added(attached) => Some(attached),
            _ => None,
        })
    }

    /// Keys removed successfully
    pub fn removed(&self) -> impl Iterator<Item = &IdentityKey> {
        self.results
            .iter()
            .filter(|(_, outcome)| matches!(outcome, OperationOutcome::Removed))
            .map(|(key, _)| key)
    }

    /// Failed operations with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&IdentityKey, &ControllerError)> {
        self.results.iter().filter_map(|(key, outcome)| match outcome {
            OperationOutcome::Failed(e) => Some((key, e)),
            _ => None,
        })
    }
}

/// Runs attach and detach operations against a located namespace.
#[derive(Clone)]
pub struct AttachmentExecutor {
    cni: Arc<dyn CniClientTrait>,
    networks: Arc<dyn NetworkConfigSource>,
    locator: Arc<dyn NamespaceLocator>,
}

impl std::fmt::Debug for AttachmentExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentExecutor").finish_non_exhaustive()
    }
}

impl AttachmentExecutor {
    /// Create an executor
    pub fn new(
        cni: Arc<dyn CniClientTrait>,
        networks: Arc<dyn NetworkConfigSource>,
        locator: Arc<dyn NamespaceLocator>,
    ) -> Self {
        Self { cni, networks, locator }
    }

    /// Apply `operations` in order, each bounded by `deadline`.
    ///
    /// Once the namespace is found gone, remaining adds are aborted while
    /// removes still run. Operations reached after the deadline fail with
    /// [`ControllerError::Timeout`] without calling any plugin.
    pub async fn execute(
        &self,
        snapshot: &WorkloadSnapshot,
        handle: &NamespaceHandle,
        operations: &[Operation],
        deadline: Instant,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for operation in operations {
            let outcome = match operation {
                _ if Instant::now() >= deadline => {
                    OperationOutcome::Failed(deadline_exceeded(snapshot, operation.key()))
                }
                Operation::Add { key, request } => {
                    if report.namespace_lost || !self.locator.is_alive(handle) {
                        if !report.namespace_lost {
                            warn!("Network namespace of pod {} vanished, aborting remaining attachments", snapshot.key);
                        }
                        report.namespace_lost = true;
                        OperationOutcome::Aborted
                    } else {
                        match self.add(snapshot, handle, key, request, deadline).await {
                            Ok(attached) => OperationOutcome::Added(attached),
                            Err(e) => OperationOutcome::Failed(e),
                        }
                    }
                }
                Operation::Remove { key, attached } => match self.remove(snapshot, handle, key, attached, deadline).await {
                    Ok(()) => OperationOutcome::Removed,
                    Err(e) => OperationOutcome::Failed(e),
                },
            };
            report.record(operation.key().clone(), outcome);
        }

        report
    }

    /// Detach interfaces that were wired but never published.
    ///
    /// Failures are logged; the devices are then left for the runtime to
    /// reclaim with the sandbox.
    pub async fn release(&self, snapshot: &WorkloadSnapshot, handle: &NamespaceHandle, attached: &[AttachedInterface]) {
        for interface in attached {
            let key = interface.key();
            let Some(config) = self.network_config(&interface.network).await.ok().flatten() else {
                warn!("Cannot release {} on pod {}: network configuration unavailable", key, snapshot.key);
                continue;
            };
            match self.cni.del(&config, &cni_request(snapshot, handle, &key.interface)).await {
                Ok(()) => info!("Released unpublished attachment {} on pod {}", key, snapshot.key),
                Err(e) => warn!("Release of {} on pod {} failed: {}", key, snapshot.key, e),
            }
        }
    }

    async fn add(
        &self,
        snapshot: &WorkloadSnapshot,
        handle: &NamespaceHandle,
        key: &IdentityKey,
        request: &AttachmentRequest,
        deadline: Instant,
    ) -> Result<AttachedInterface, ControllerError> {
        let config = self.network_config(&request.network).await?.ok_or_else(|| {
            ControllerError::NetworkConfigNotFound(format!("no CNI configuration for network {}", request.network))
        })?;

        let mut cni_request = cni_request(snapshot, handle, &key.interface);
        cni_request.runtime_config = RuntimeConfig {
            ips: request.ips.clone(),
            mac: request.mac.clone(),
        };
        cni_request.cni_args = request.cni_args.clone();

        let error = match tokio::time::timeout_at(deadline, self.cni.add(&config, &cni_request)).await {
            Ok(Ok(result)) => {
                let attached = attached_from_result(request, &key.interface, &result);
                info!(
                    "Attached {} to pod {} (mac {}, ips [{}])",
                    key,
                    snapshot.key,
                    attached.mac().unwrap_or("unknown"),
                    attached.ips().join(", ")
                );
                return Ok(attached);
            }
            Ok(Err(e)) => ControllerError::AttachmentFailed(format!("{key}: {e}")),
            Err(_) => deadline_exceeded(snapshot, key),
        };

        // The chain may have created the device before failing.
        if let Err(cleanup) = self.cni.del(&config, &cni_request).await {
            warn!("Cleanup of failed attachment {} on pod {} failed: {}", key, snapshot.key, cleanup);
        }
        Err(error)
    }

    async fn remove(
        &self,
        snapshot: &WorkloadSnapshot,
        handle: &NamespaceHandle,
        key: &IdentityKey,
        attached: &AttachedInterface,
        deadline: Instant,
    ) -> Result<(), ControllerError> {
        let Some(config) = self.network_config(&attached.network).await? else {
            warn!(
                "Network {} no longer has a CNI configuration, treating {} on pod {} as removed",
                attached.network, key, snapshot.key
            );
            return Ok(());
        };

        let cni_request = cni_request(snapshot, handle, &key.interface);
        match tokio::time::timeout_at(deadline, self.cni.del(&config, &cni_request)).await {
            Ok(Ok(())) => {
                info!("Detached {} from pod {}", key, snapshot.key);
                Ok(())
            }
            Ok(Err(e)) if !self.locator.is_alive(handle) => {
                info!("Namespace of pod {} is gone, {} counts as removed ({})", snapshot.key, key, e);
                Ok(())
            }
            Ok(Err(e)) => Err(ControllerError::AttachmentFailed(format!("{key}: {e}"))),
            // The entry stays published; DEL is idempotent on the next pass.
            Err(_) => Err(deadline_exceeded(snapshot, key)),
        }
    }

    async fn network_config(&self, network: &NetworkRef) -> Result<Option<NetworkConfigList>, ControllerError> {
        match self.networks.resolve(network).await? {
            Some(raw) => Ok(Some(NetworkConfigList::parse(&raw, &network.name)?)),
            None => Ok(None),
        }
    }
}

fn deadline_exceeded(snapshot: &WorkloadSnapshot, key: &IdentityKey) -> ControllerError {
    ControllerError::Timeout(format!("{key} on pod {} ran past the pass deadline", snapshot.key))
}

fn cni_request(snapshot: &WorkloadSnapshot, handle: &NamespaceHandle, ifname: &str) -> CniRequest {
    let mut request = CniRequest::new(handle.sandbox_id.clone(), handle.path.clone(), ifname);
    request.args = vec![
        ("IgnoreUnknown".to_string(), "1".to_string()),
        ("K8S_POD_NAMESPACE".to_string(), snapshot.key.namespace.clone()),
        ("K8S_POD_NAME".to_string(), snapshot.key.name.clone()),
        ("K8S_POD_INFRA_CONTAINER_ID".to_string(), handle.sandbox_id.clone()),
        ("K8S_POD_UID".to_string(), snapshot.uid.clone()),
    ];
    request
}

fn attached_from_result(request: &AttachmentRequest, ifname: &str, result: &CniResult) -> AttachedInterface {
    let mac = result
        .sandbox_interface(ifname)
        .and_then(|iface| iface.mac.clone())
        .or_else(|| request.mac.clone());
    let mut attached = AttachedInterface::new(request.network.clone(), ifname, result.addresses_for(ifname), mac);
    attached.status.dns = result.dns.clone().filter(|dns| !dns.as_object().is_some_and(|dns| dns.is_empty()));
    attached.status.gateway.clone_from(&request.default_route);
    attached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkloadKey;
    use cni_client::{CniInterface, CniIpConfig};
    use std::path::PathBuf;

    fn snapshot() -> WorkloadSnapshot {
        WorkloadSnapshot {
            key: WorkloadKey::new("ns1", "web-0"),
            uid: "uid-1".to_string(),
            ..Default::default()
        }
    }

    fn handle() -> NamespaceHandle {
        NamespaceHandle {
            path: "/proc/4242/ns/net".into(),
            container_id: "abc123".to_string(),
            sandbox_id: "9f2e7d".to_string(),
            pid: 4242,
        }
    }

    #[test]
    fn test_cni_request_identity() {
        let request = cni_request(&snapshot(), &handle(), "ens58");
        assert_eq!(request.container_id, "9f2e7d");
        assert_eq!(request.netns, PathBuf::from("/proc/4242/ns/net"));
        assert_eq!(request.ifname, "ens58");
        assert_eq!(
            request.cni_args_env(),
            "IgnoreUnknown=1;K8S_POD_NAMESPACE=ns1;K8S_POD_NAME=web-0;K8S_POD_INFRA_CONTAINER_ID=9f2e7d;K8S_POD_UID=uid-1"
        );
    }

    #[test]
    fn test_attached_from_result_prefers_sandbox_mac() {
        let request = AttachmentRequest {
            network: NetworkRef::new("ns1", "tenant-network"),
            interface: Some("ens58".to_string()),
            ips: Vec::new(),
            mac: None,
            default_route: vec!["10.10.0.1".to_string()],
            cni_args: None,
        };
        let result = CniResult {
            cni_version: "0.3.1".to_string(),
            interfaces: vec![
                CniInterface {
                    name: "mac-host".to_string(),
                    mac: Some("ff:ff:ff:ff:ff:ff".to_string()),
                    sandbox: None,
                },
                CniInterface {
                    name: "ens58".to_string(),
                    mac: Some("0a:58:0a:0a:00:05".to_string()),
                    sandbox: Some("/proc/4242/ns/net".to_string()),
                },
            ],
            ips: vec![CniIpConfig {
                address: "10.10.0.5/24".to_string(),
                gateway: Some("10.10.0.1".to_string()),
                interface: Some(1),
            }],
            routes: Vec::new(),
            dns: None,
        };

        let attached = attached_from_result(&request, "ens58", &result);
        assert_eq!(attached.mac(), Some("0a:58:0a:0a:00:05"));
        assert_eq!(attached.ips().to_vec(), vec!["10.10.0.5".to_string()]);
        assert_eq!(attached.status.name, "ns1/tenant-network");
        assert_eq!(attached.status.gateway, vec!["10.10.0.1".to_string()]);
        assert!(!attached.status.default);
    }
}
