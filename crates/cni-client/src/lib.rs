//! CNI Delegation Client
//!
//! A Rust client for invoking CNI plugin binaries through the exec protocol
//! described by the Container Network Interface specification.
//!
//! # Example
//!
//! ```no_run
//! use cni_client::{CniClientTrait, CniExecClient, CniRequest, NetworkConfigList};
//! use std::path::PathBuf;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CniExecClient::new(vec![PathBuf::from("/opt/cni/bin")], Duration::from_secs(30));
//!
//! let config = NetworkConfigList::parse(
//!     r#"{"cniVersion": "0.3.0", "plugins": [{"type": "macvlan", "master": "eth0"}]}"#,
//!     "tenant-network",
//! )?;
//! let request = CniRequest::new("pod-uid", "/proc/1234/ns/net", "net1");
//!
//! let result = client.add(&config, &request).await?;
//! client.del(&config, &request).await?;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Plugin chains**: single plugin configs and `plugins` lists, with
//!   `prevResult` threading on ADD and reverse-order DEL
//! - **Capabilities**: `runtimeConfig` entries are only passed to plugins
//!   that declare the matching capability
//! - **Timeouts**: every plugin exec is bounded
//! - **Mocking**: `MockCniClient` behind the `test-util` feature

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod cni_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::CniExecClient;
pub use error::CniError;
pub use models::*;
pub use cni_trait::CniClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockCniClient;
