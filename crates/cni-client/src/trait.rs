//! CniClientTrait for mocking
//!
//! This trait abstracts plugin delegation so the reconciler can be unit
//! tested without executing real plugin binaries.

use crate::error::CniError;
use crate::models::{CniRequest, CniResult, NetworkConfigList};

/// Trait for CNI plugin chain operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait CniClientTrait: Send + Sync {
    /// Run ADD for every plugin in the chain, threading `prevResult`.
    async fn add(&self, config: &NetworkConfigList, request: &CniRequest) -> Result<CniResult, CniError>;

    /// Run DEL for every plugin in the chain, in reverse order.
    ///
    /// DEL is expected to succeed when the interface is already gone.
    async fn del(&self, config: &NetworkConfigList, request: &CniRequest) -> Result<(), CniError>;
}
