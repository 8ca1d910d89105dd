//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the reconciler to
//! its Kubernetes and CNI backends, and runs the pod watcher next to the
//! health endpoints until shutdown.

use crate::backoff::{ExponentialBackoff, RetryTracker};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::events::KubeEventSink;
use crate::executor::AttachmentExecutor;
use crate::health::{self, HealthState};
use crate::metrics::Metrics;
use crate::namespace::{NamespaceLocator, RuntimeNamespaceLocator};
use crate::networks::KubeNetworkConfigSource;
use crate::publisher::StatusPublisher;
use crate::reconciler::Reconciler;
use crate::store::{KubePodStore, PodStore};
use crate::watcher::{Context, PodWatcher};
use cni_client::CniExecClient;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Dynamic networks controller for one node.
pub struct Controller {
    config: ControllerConfig,
    watcher: PodWatcher,
    health: HealthState,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Dynamic Networks Controller");

        let client = Client::try_default().await?;
        let metrics = Arc::new(Metrics::new()?);

        let store: Arc<dyn PodStore> = Arc::new(KubePodStore::new(client.clone()));
        let locator: Arc<dyn NamespaceLocator> = Arc::new(RuntimeNamespaceLocator::new(
            config.runtime_state_dirs.clone(),
            config.proc_root.clone(),
        ));
        let cni = CniExecClient::new(config.cni_bin_dirs.clone(), config.cni_exec_timeout)
            .with_cache_dir(config.cni_cache_dir.clone());
        let executor = AttachmentExecutor::new(
            Arc::new(cni),
            Arc::new(KubeNetworkConfigSource::new(client.clone())),
            Arc::clone(&locator),
        );

        let reconciler = Reconciler {
            store: Arc::clone(&store),
            locator,
            executor,
            publisher: StatusPublisher::new(store),
            events: Arc::new(KubeEventSink::new(client.clone(), &config.node_name)),
            metrics: Arc::clone(&metrics),
            node_name: config.node_name.clone(),
            diff_config: config.diff_config(),
            conflict_retries: config.conflict_retries,
            pass_timeout: config.pass_timeout,
        };

        let context = Arc::new(Context {
            reconciler,
            retries: RetryTracker::new(ExponentialBackoff::new(config.backoff_base, config.backoff_max)),
            metrics: Arc::clone(&metrics),
            node_name: config.node_name.clone(),
        });
        let health = HealthState::new(metrics);

        let pods: Api<Pod> = match config.watch_namespace.as_deref() {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::all(client),
        };
        // Validated to fit when the configuration was loaded.
        let concurrency = u16::try_from(config.workers).unwrap_or(u16::MAX);
        let watcher = PodWatcher::new(pods, context, health.clone(), config.debounce, concurrency);

        Ok(Self {
            config,
            watcher,
            health,
        })
    }

    /// Runs the controller until a shutdown signal arrives or the health
    /// server stops.
    pub async fn run(self) -> Result<(), ControllerError> {
        let listener = TcpListener::bind(self.config.health_addr).await.map_err(|e| {
            ControllerError::InvalidConfig(format!("cannot listen on {}: {}", self.config.health_addr, e))
        })?;
        info!("Serving health checks and metrics on {}", self.config.health_addr);
        let health_server = axum::serve(listener, health::router(self.health.clone())).into_future();

        info!("Running up to {} pass(es) at a time", self.config.workers);
        let result = tokio::select! {
            result = self.watcher.run() => result,
            result = health_server => {
                error!("Health check server stopped");
                result.map_err(|e| ControllerError::InvalidConfig(format!("health check server failed: {e}")))
            }
        };

        self.health.set_ready(false);
        info!("Dynamic Networks Controller stopped");
        result
    }
}
