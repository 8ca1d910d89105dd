//! Pod watcher.
//!
//! Drives reconcile passes from a node-scoped pod watch through
//! `kube_runtime::Controller`. The controller debounces bursts of events for
//! the same pod, never runs two passes for one pod at once, and requeues a
//! pod after the delay its last pass asked for. The pass itself always reads
//! the latest pod, so the at-least-once watch stream is harmless.

use crate::backoff::RetryTracker;
use crate::error::ControllerError;
use crate::health::HealthState;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::store::WorkloadSnapshot;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube_runtime::controller::{Action, Config as RuntimeConfig, Error as RuntimeError};
use kube_runtime::{Controller, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Whether a pod event should lead to a pass.
///
/// Only running pods on `node_name` that carry one of the network
/// annotations are interesting; pending pods get another event once their
/// sandbox is up.
pub fn should_reconcile(snapshot: &WorkloadSnapshot, node_name: &str) -> bool {
    snapshot.node_name.as_deref() == Some(node_name)
        && snapshot.is_running()
        && !snapshot.terminating
        && (snapshot.desired_raw.is_some() || snapshot.actual_raw.is_some())
}

/// State shared by every pass.
pub struct Context {
    pub(crate) reconciler: Reconciler,
    pub(crate) retries: RetryTracker,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) node_name: String,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("node_name", &self.node_name)
            .finish_non_exhaustive()
    }
}

/// Run one pass for `pod` and decide when to look at it again.
///
/// Converged pods wait for their next change. Partially applied pods are
/// requeued with backoff; errors go through [`error_policy`].
pub async fn reconcile(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let snapshot = WorkloadSnapshot::from_pod(&pod);
    let key = snapshot.key.clone();
    if !should_reconcile(&snapshot, &ctx.node_name) {
        ctx.retries.reset(&key);
        return Ok(Action::await_change());
    }

    debug!("Reconciling pod {}", key);
    let result = {
        let _running = ctx.metrics.pass_started();
        ctx.reconciler.reconcile(&key).await
    };

    match result {
        Ok(outcome) if outcome.needs_retry() => {
            ctx.metrics.record_pass(outcome.label());
            let delay = ctx.retries.record_failure(&key);
            warn!("Pod {}: pass incomplete ({:?}), retrying in {:?}", key, outcome, delay);
            Ok(Action::requeue(delay))
        }
        Ok(outcome) => {
            ctx.metrics.record_pass(outcome.label());
            debug!("Pod {}: pass finished ({})", key, outcome.label());
            ctx.retries.reset(&key);
            Ok(Action::await_change())
        }
        Err(e) => {
            ctx.metrics.record_pass("error");
            Err(e)
        }
    }
}

/// Requeue retryable failures with backoff and leave the rest until the
/// pod changes.
pub fn error_policy(pod: Arc<Pod>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = WorkloadSnapshot::from_pod(&pod).key;
    if error.is_retryable() {
        let delay = ctx.retries.record_failure(&key);
        warn!(
            "Pod {}: {} (attempt {}, retrying in {:?})",
            key,
            error,
            ctx.retries.attempts(&key),
            delay
        );
        Action::requeue(delay)
    } else {
        error!("Pod {}: {}", key, error);
        ctx.retries.reset(&key);
        Action::await_change()
    }
}

/// Watches the pods of one node.
pub struct PodWatcher {
    api: Api<Pod>,
    context: Arc<Context>,
    health: HealthState,
    debounce: Duration,
    concurrency: u16,
}

impl std::fmt::Debug for PodWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodWatcher")
            .field("node_name", &self.context.node_name)
            .field("debounce", &self.debounce)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl PodWatcher {
    /// Creates a new watcher instance.
    pub fn new(api: Api<Pod>, context: Arc<Context>, health: HealthState, debounce: Duration, concurrency: u16) -> Self {
        Self {
            api,
            context,
            health,
            debounce,
            concurrency,
        }
    }

    /// Reconcile pods until a shutdown signal arrives.
    ///
    /// Watch errors are retried with backoff by the controller and only
    /// logged here. Readiness flips once the pod cache has synced.
    pub async fn run(self) -> Result<(), ControllerError> {
        let node_name = self.context.node_name.clone();
        info!("Starting pod watcher for node {}", node_name);

        let watch_config = watcher::Config::default().fields(&format!("spec.nodeName={node_name}"));
        let controller_config = RuntimeConfig::default()
            .debounce(self.debounce)
            .concurrency(self.concurrency);
        let controller = Controller::new(self.api, watch_config).with_config(controller_config);

        let store = controller.store();
        let health = self.health.clone();
        tokio::spawn(async move {
            match store.wait_until_ready().await {
                Ok(()) => {
                    info!("Pod cache synced");
                    health.set_ready(true);
                }
                Err(e) => warn!("Pod cache never synced: {}", e),
            }
        });

        controller
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.context)
            .for_each(|result| async move {
                match result {
                    Ok((pod, _)) => debug!("Reconciled pod {}", pod),
                    Err(RuntimeError::ObjectNotFound(pod)) => debug!("Pod {} left the cache", pod),
                    Err(RuntimeError::ReconcilerFailed(e, pod)) => debug!("Pass for pod {} failed: {}", pod, e),
                    Err(e) => error!("Pod controller error: {}", e),
                }
            })
            .await;

        self.health.set_ready(false);
        info!("Pod watcher for node {} stopped", node_name);
        Ok(())
    }
}
