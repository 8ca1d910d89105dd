//! Reconciliation logic for pod network attachments.
//!
//! One pass reads the pod, diffs desired against actual attachments, applies
//! the resulting operations and publishes the new network status. A version
//! conflict on publish restarts the pass against the fresh pod while keeping
//! what was already applied, so no device is ever wired twice. A pass that
//! gives up before publishing detaches what it wired, so the next pass does
//! not find devices the network status does not know about.

use crate::diff::{self, DiffConfig, Operation};
use crate::error::ControllerError;
use crate::events::{EventSink, PodEventKind};
use crate::executor::{AttachmentExecutor, ExecutionReport, OperationOutcome};
use crate::metrics::Metrics;
use crate::model::{AttachedInterface, WorkloadKey};
use crate::namespace::{NamespaceHandle, NamespaceLocator};
use crate::parser::{parse_actual, parse_desired};
use crate::publisher::{StatusPublisher, recompute};
use crate::store::{PodStore, WorkloadSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Actual state matches desired state
    Converged,
    /// Desired state names a network without an interface; nothing was done
    Ambiguous,
    /// The pod is gone or no longer runs on this node
    PodGone,
    /// The namespace disappeared mid-pass
    NamespaceLost,
    /// Some operations failed; the successful ones were published
    Partial {
        /// Number of failed operations
        failed: usize,
    },
}

impl PassOutcome {
    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Ambiguous => "ambiguous",
            Self::PodGone => "pod_gone",
            Self::NamespaceLost => "namespace_lost",
            Self::Partial { .. } => "partial",
        }
    }

    /// Whether the pod should be looked at again without waiting for a change
    pub fn needs_retry(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }
}

/// What a pass has done so far, across conflict retries.
#[derive(Debug, Default)]
struct PassLedger {
    applied: ExecutionReport,
    /// Pod and namespace the last operations ran against
    target: Option<(WorkloadSnapshot, NamespaceHandle)>,
}

impl PassLedger {
    fn unpublished(&self) -> Vec<AttachedInterface> {
        self.applied.added().cloned().collect()
    }
}

/// Reconciles the attachments of pods on one node.
pub struct Reconciler {
    pub(crate) store: Arc<dyn PodStore>,
    pub(crate) locator: Arc<dyn NamespaceLocator>,
    pub(crate) executor: AttachmentExecutor,
    pub(crate) publisher: StatusPublisher,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) node_name: String,
    pub(crate) diff_config: DiffConfig,
    pub(crate) conflict_retries: u32,
    pub(crate) pass_timeout: Duration,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("node_name", &self.node_name)
            .field("diff_config", &self.diff_config)
            .field("conflict_retries", &self.conflict_retries)
            .field("pass_timeout", &self.pass_timeout)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Run one reconcile pass for `key`.
    ///
    /// Plugin calls are bounded by the pass timeout. Operations cut off by it
    /// are undone and reported as [`ControllerError::Timeout`] once the rest
    /// of the pass is published.
    pub async fn reconcile(&self, key: &WorkloadKey) -> Result<PassOutcome, ControllerError> {
        let deadline = Instant::now() + self.pass_timeout;
        let mut ledger = PassLedger::default();

        let result = self.converge(key, deadline, &mut ledger).await;
        if result.is_err() {
            self.roll_back(&ledger).await;
        }
        let outcome = result?;

        if let Some((timed_out, e)) = ledger
            .applied
            .failures()
            .find(|(_, e)| matches!(e, ControllerError::Timeout(_)))
        {
            return Err(ControllerError::Timeout(format!("pod {key}: {timed_out}: {e}")));
        }
        Ok(outcome)
    }

    /// Apply and publish until the pod's status is written or the pass gives
    /// up. Returns `Ok` only once nothing in `ledger` is left unpublished.
    async fn converge(
        &self,
        key: &WorkloadKey,
        deadline: Instant,
        ledger: &mut PassLedger,
    ) -> Result<PassOutcome, ControllerError> {
        let mut conflicts = 0;

        loop {
            let snapshot = match self.store.get(key).await {
                Ok(snapshot) => snapshot,
                Err(ControllerError::PodNotFound(_)) => {
                    debug!("Pod {} no longer exists", key);
                    return Ok(PassOutcome::PodGone);
                }
                Err(e) => return Err(e),
            };
            if snapshot.node_name.as_deref() != Some(self.node_name.as_str()) {
                debug!("Pod {} is not scheduled on node {}", key, self.node_name);
                return Ok(PassOutcome::PodGone);
            }

            let (desired, observed) = match parse_desired(snapshot.desired_raw.as_deref(), &key.namespace)
                .and_then(|desired| {
                    parse_actual(snapshot.actual_raw.as_deref(), &key.namespace).map(|observed| (desired, observed))
                }) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Pod {}: {}", key, e);
                    self.events
                        .publish(&snapshot.object_ref(), PodEventKind::MalformedAnnotation, e.to_string())
                        .await;
                    return Err(e);
                }
            };

            // Overlay what earlier attempts of this pass already applied.
            let actual = recompute(&observed, &ledger.applied);

            let mut ambiguous = false;
            let operations = match diff::compute(&desired, &actual, &self.diff_config) {
                Ok(operations) => operations,
                Err(ControllerError::AmbiguousDesiredState(reason)) => {
                    debug!("Pod {}: leaving attachments untouched, {}", key, reason);
                    ambiguous = true;
                    Vec::new()
                }
                Err(e) => return Err(e),
            };

            if !operations.is_empty() {
                info!("Pod {}: applying {} operation(s)", key, operations.len());
                let handle = self.locator.locate(&snapshot)?;
                let report = self.executor.execute(&snapshot, &handle, &operations, deadline).await;
                self.record(&snapshot, &operations, &report).await;
                ledger.applied.merge(report);
                ledger.target = Some((snapshot.clone(), handle));
            }

            let next = recompute(&observed, &ledger.applied);
            match self.publisher.publish(&snapshot, &observed, &next).await {
                Ok(_) => return Ok(Self::outcome(&ledger.applied, ambiguous)),
                Err(ControllerError::VersionConflict(reason)) if conflicts < self.conflict_retries => {
                    conflicts += 1;
                    warn!(
                        "Pod {}: {} (retry {}/{})",
                        key, reason, conflicts, self.conflict_retries
                    );
                }
                Err(ControllerError::PodNotFound(_)) => return Ok(PassOutcome::PodGone),
                Err(e) => return Err(e),
            }
        }
    }

    /// Detach everything the failed pass wired but never published.
    async fn roll_back(&self, ledger: &PassLedger) {
        let unpublished = ledger.unpublished();
        let Some((snapshot, handle)) = ledger.target.as_ref() else {
            return;
        };
        if unpublished.is_empty() {
            return;
        }
        warn!(
            "Pod {}: pass failed before publishing, releasing {} attachment(s)",
            snapshot.key,
            unpublished.len()
        );
        self.executor.release(snapshot, handle, &unpublished).await;
    }

    fn outcome(applied: &ExecutionReport, ambiguous: bool) -> PassOutcome {
        let failed = applied.failures().count();
        if applied.namespace_lost {
            PassOutcome::NamespaceLost
        } else if failed > 0 {
            PassOutcome::Partial { failed }
        } else if ambiguous {
            PassOutcome::Ambiguous
        } else {
            PassOutcome::Converged
        }
    }

    async fn record(&self, snapshot: &WorkloadSnapshot, operations: &[Operation], report: &ExecutionReport) {
        let pod_ref = snapshot.object_ref();
        for operation in operations {
            let key = operation.key();
            let Some(outcome) = report.outcome(key) else {
                continue;
            };
            let kind = if operation.is_add() { "add" } else { "remove" };
            let result = match outcome {
                OperationOutcome::Added(_) | OperationOutcome::Removed => "success",
                OperationOutcome::Failed(_) => "failure",
                OperationOutcome::Aborted => "aborted",
            };
            self.metrics.record_operation(kind, result);

            match outcome {
                OperationOutcome::Added(attached) => {
                    let note = format!(
                        "Added interface {} from network {} (ips [{}])",
                        attached.interface,
                        attached.network,
                        attached.ips().join(", ")
                    );
                    self.events.publish(&pod_ref, PodEventKind::AddedInterface, note).await;
                }
                OperationOutcome::Removed => {
                    let note = format!("Removed interface {} from network {}", key.interface, key.network);
                    self.events.publish(&pod_ref, PodEventKind::RemovedInterface, note).await;
                }
                OperationOutcome::Failed(e) => {
                    warn!("Pod {}: {}", snapshot.key, e);
                    self.events
                        .publish(&pod_ref, PodEventKind::AttachmentFailed, e.to_string())
                        .await;
                }
                OperationOutcome::Aborted => {}
            }
        }
    }
}
