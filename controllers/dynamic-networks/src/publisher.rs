//! Status publisher
//!
//! Folds execution results into actual state and writes the network status
//! annotation back under resourceVersion compare-and-swap.

use crate::error::ControllerError;
use crate::executor::ExecutionReport;
use crate::model::{ActualState, IdentityKey};
use crate::parser::render_actual;
use crate::store::{PodStore, WorkloadSnapshot};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Actual state after applying `report` to `previous`.
///
/// Removed keys are dropped, previous order is kept and new attachments are
/// appended. Failed and aborted operations leave no trace.
pub fn recompute(previous: &ActualState, report: &ExecutionReport) -> ActualState {
    let removed: HashSet<&IdentityKey> = report.removed().collect();

    let mut attachments: Vec<_> = previous
        .attachments
        .iter()
        .filter(|attached| !removed.contains(&attached.key()))
        .cloned()
        .collect();

    for added in report.added() {
        if !attachments.iter().any(|attached| attached.key() == added.key()) {
            attachments.push(added.clone());
        }
    }

    ActualState {
        primary: previous.primary.clone(),
        attachments,
    }
}

/// Writes network status back to pods.
#[derive(Clone)]
pub struct StatusPublisher {
    store: Arc<dyn PodStore>,
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher").finish_non_exhaustive()
    }
}

impl StatusPublisher {
    /// Create a publisher writing through `store`
    pub fn new(store: Arc<dyn PodStore>) -> Self {
        Self { store }
    }

    /// Publish `next` unless it equals what the pod already carries.
    ///
    /// Returns whether a write happened. A concurrent change to the pod
    /// surfaces as [`ControllerError::VersionConflict`].
    pub async fn publish(
        &self,
        snapshot: &WorkloadSnapshot,
        observed: &ActualState,
        next: &ActualState,
    ) -> Result<bool, ControllerError> {
        if next == observed {
            debug!("Network status of pod {} is unchanged", snapshot.key);
            return Ok(false);
        }

        let rendered = render_actual(next)?;
        self.store
            .patch_network_status(&snapshot.key, &snapshot.resource_version, &rendered)
            .await?;
        info!(
            "Published network status of pod {} ({} secondary interfaces)",
            snapshot.key,
            next.attachments.len()
        );
        Ok(true)
    }
}
