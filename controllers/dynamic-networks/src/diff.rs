//! Diff engine
//!
//! Computes the attach/detach operations that move actual state to desired
//! state. Attachments are compared by identity key only; a key present on
//! both sides is left alone even when its addressing differs.

use crate::error::ControllerError;
use crate::model::{ActualState, AttachedInterface, AttachmentRequest, IdentityKey};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// A single change to apply to a pod's network namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Attach a new interface
    Add {
        /// Identity of the new attachment
        key: IdentityKey,
        /// What was asked for
        request: AttachmentRequest,
    },
    /// Detach an existing interface
    Remove {
        /// Identity of the attachment
        key: IdentityKey,
        /// What is currently wired
        attached: AttachedInterface,
    },
}

impl Operation {
    /// Identity key the operation acts on
    pub fn key(&self) -> &IdentityKey {
        match self {
            Self::Add { key, .. } | Self::Remove { key, .. } => key,
        }
    }

    /// Whether this is an `Add`
    pub fn is_add(&self) -> bool {
        matches!(self, Self::Add { .. })
    }
}

/// Which group of operations runs first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// Attach before detaching
    #[default]
    AddFirst,
    /// Detach before attaching
    RemoveFirst,
}

impl FromStr for OrderingPolicy {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add-first" => Ok(Self::AddFirst),
            "remove-first" => Ok(Self::RemoveFirst),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown ordering policy {other:?} (expected add-first or remove-first)"
            ))),
        }
    }
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddFirst => f.write_str("add-first"),
            Self::RemoveFirst => f.write_str("remove-first"),
        }
    }
}

/// Tunables for [`compute`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffConfig {
    /// Preferred ordering
    pub ordering: OrderingPolicy,
    /// Interfaces a namespace may hold, primary included
    pub max_interfaces: Option<usize>,
}

/// Compute the ordered operations that reconcile `actual` with `desired`.
///
/// Returns [`ControllerError::AmbiguousDesiredState`] when any desired entry
/// has no interface name. Callers treat that as a no-op, not a failure.
///
/// Under add-first, removals whose interface name an add takes over still
/// run before the adds.
pub fn compute(
    desired: &[AttachmentRequest],
    actual: &ActualState,
    config: &DiffConfig,
) -> Result<Vec<Operation>, ControllerError> {
    let unnamed: Vec<String> = desired
        .iter()
        .filter(|request| request.key().is_none())
        .map(|request| request.network.to_string())
        .collect();
    if !unnamed.is_empty() {
        return Err(ControllerError::AmbiguousDesiredState(format!(
            "no interface name for {}",
            unnamed.join(", ")
        )));
    }

    let desired_keys: HashSet<IdentityKey> = desired.iter().filter_map(AttachmentRequest::key).collect();

    let adds: Vec<Operation> = desired
        .iter()
        .filter_map(|request| request.key().map(|key| (key, request)))
        .filter(|(key, _)| !actual.contains(key))
        .map(|(key, request)| Operation::Add {
            key,
            request: request.clone(),
        })
        .collect();

    let removes: Vec<Operation> = actual
        .attachments
        .iter()
        .filter(|attached| !desired_keys.contains(&attached.key()))
        .map(|attached| Operation::Remove {
            key: attached.key(),
            attached: attached.clone(),
        })
        .collect();

    let over_capacity = config
        .max_interfaces
        .is_some_and(|max| actual.interface_count() + adds.len() > max);

    let ordering = if over_capacity && !removes.is_empty() {
        OrderingPolicy::RemoveFirst
    } else {
        config.ordering
    };

    let operations = match ordering {
        OrderingPolicy::AddFirst => {
            // A removal that frees an interface name an add reuses must run first.
            let reused: HashSet<&str> = adds.iter().map(|op| op.key().interface.as_str()).collect();
            let (freeing, rest): (Vec<Operation>, Vec<Operation>) = removes
                .into_iter()
                .partition(|op| reused.contains(op.key().interface.as_str()));
            freeing.into_iter().chain(adds).chain(rest).collect()
        }
        OrderingPolicy::RemoveFirst => removes.into_iter().chain(adds).collect(),
    };
    Ok(operations)
}
