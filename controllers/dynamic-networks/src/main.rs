//! Dynamic Networks Controller
//!
//! Node-local controller that hot-plugs secondary network interfaces into
//! running pods:
//! - Watches the `k8s.v1.cni.cncf.io/networks` annotation of pods on this node
//! - Attaches and detaches interfaces through the CNI plugin chain of each
//!   NetworkAttachmentDefinition
//! - Keeps `k8s.v1.cni.cncf.io/network-status` in sync with what is wired
//!
//! Pods never restart; only the delta between requested and attached
//! interfaces is applied.

mod backoff;
mod config;
mod controller;
mod diff;
mod error;
mod events;
mod executor;
mod health;
mod metrics;
mod model;
mod namespace;
mod networks;
mod parser;
mod publisher;
mod reconciler;
mod store;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Dynamic Networks Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Node: {}", config.node_name);
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  CNI plugin dirs: {:?}", config.cni_bin_dirs);
    info!("  CNI cache dir: {}", config.cni_cache_dir.display());
    info!("  Runtime pid files: {:?}", config.runtime_state_dirs);
    info!("  Concurrent passes: {}", config.workers);
    info!("  Pass timeout: {:?}", config.pass_timeout);
    info!("  Ordering: {}", config.ordering);
    info!(
        "  Max interfaces: {}",
        config.max_interfaces.map_or_else(|| "unbounded".to_string(), |max| max.to_string())
    );

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
