//! Controller configuration
//!
//! Everything is read from environment variables once at startup.

use crate::diff::{DiffConfig, OrderingPolicy};
use crate::error::ControllerError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// containerd (v2 shim) and CRI-O pid file locations; `{id}` is the container ID.
const DEFAULT_RUNTIME_STATE_DIRS: &str = "/run/containerd/io.containerd.runtime.v2.task/k8s.io/{id}/init.pid:\
/run/containers/storage/overlay-containers/{id}/userdata/pidfile";

/// Runtime configuration for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Node this instance reconciles pods for
    pub node_name: String,
    /// Restrict the watch to one namespace
    pub watch_namespace: Option<String>,
    /// Directories searched for CNI plugin binaries
    pub cni_bin_dirs: Vec<PathBuf>,
    /// Upper bound for one plugin invocation
    pub cni_exec_timeout: Duration,
    /// Root of the CNI result cache shared with the runtime
    pub cni_cache_dir: PathBuf,
    /// Pid file templates of the container runtimes
    pub runtime_state_dirs: Vec<String>,
    /// Mount point of the host's procfs
    pub proc_root: PathBuf,
    /// Passes running at the same time
    pub workers: usize,
    /// Quiet period after a pod event before its pass starts
    pub debounce: Duration,
    /// Deadline of a single reconcile pass
    pub pass_timeout: Duration,
    /// Publish attempts after a version conflict
    pub conflict_retries: u32,
    /// First retry delay
    pub backoff_base: Duration,
    /// Longest retry delay
    pub backoff_max: Duration,
    /// Which operations go first
    pub ordering: OrderingPolicy,
    /// Interfaces a pod may hold, primary included
    pub max_interfaces: Option<usize>,
    /// Listen address for health checks and metrics
    pub health_addr: SocketAddr,
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let get = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());

        let node_name = get("NODE_NAME").ok_or_else(|| {
            ControllerError::InvalidConfig("NODE_NAME environment variable is required".to_string())
        })?;

        let config = Self {
            node_name,
            watch_namespace: get("WATCH_NAMESPACE"),
            cni_bin_dirs: split_list(get("CNI_BIN_DIR").as_deref().unwrap_or("/opt/cni/bin"))
                .map(PathBuf::from)
                .collect(),
            cni_exec_timeout: Duration::from_secs(parse_or(&get, "CNI_EXEC_TIMEOUT_SECS", 30)?),
            cni_cache_dir: PathBuf::from(get("CNI_CACHE_DIR").as_deref().unwrap_or("/var/lib/cni")),
            runtime_state_dirs: split_list(
                get("RUNTIME_STATE_DIRS")
                    .as_deref()
                    .unwrap_or(DEFAULT_RUNTIME_STATE_DIRS),
            )
            .map(str::to_string)
            .collect(),
            proc_root: PathBuf::from(get("PROC_ROOT").as_deref().unwrap_or("/proc")),
            workers: parse_or(&get, "WORKERS", 4)?,
            debounce: Duration::from_millis(parse_or(&get, "DEBOUNCE_MS", 500)?),
            pass_timeout: Duration::from_secs(parse_or(&get, "PASS_TIMEOUT_SECS", 60)?),
            conflict_retries: parse_or(&get, "CONFLICT_RETRIES", 3)?,
            backoff_base: Duration::from_millis(parse_or(&get, "BACKOFF_BASE_MS", 1000)?),
            backoff_max: Duration::from_secs(parse_or(&get, "BACKOFF_MAX_SECS", 300)?),
            ordering: parse_or(&get, "ORDERING_POLICY", OrderingPolicy::AddFirst)?,
            max_interfaces: get("MAX_INTERFACES")
                .map(|value| parse_value::<usize>("MAX_INTERFACES", &value))
                .transpose()?,
            health_addr: parse_or(&get, "HEALTH_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.workers == 0 || u16::try_from(self.workers).is_err() {
            return Err(ControllerError::InvalidConfig(format!(
                "WORKERS must be between 1 and {}",
                u16::MAX
            )));
        }
        if self.cni_bin_dirs.is_empty() {
            return Err(ControllerError::InvalidConfig("CNI_BIN_DIR must name a directory".to_string()));
        }
        if self.pass_timeout.is_zero() || self.cni_exec_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig("timeouts must be greater than zero".to_string()));
        }
        if self.backoff_base > self.backoff_max {
            return Err(ControllerError::InvalidConfig(
                "BACKOFF_BASE_MS must not exceed BACKOFF_MAX_SECS".to_string(),
            ));
        }
        if self.max_interfaces == Some(0) {
            return Err(ControllerError::InvalidConfig("MAX_INTERFACES must be at least 1".to_string()));
        }
        if self.runtime_state_dirs.iter().any(|template| !template.contains("{id}")) {
            return Err(ControllerError::InvalidConfig(
                "every RUNTIME_STATE_DIRS entry must contain an {id} placeholder".to_string(),
            ));
        }
        Ok(())
    }

    /// Diff settings derived from this configuration
    pub fn diff_config(&self) -> DiffConfig {
        DiffConfig {
            ordering: self.ordering,
            max_interfaces: self.max_interfaces,
        }
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(':').map(str::trim).filter(|item| !item.is_empty())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ControllerError> {
    value
        .parse()
        .map_err(|_| ControllerError::InvalidConfig(format!("{key} has an invalid value: {value:?}")))
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ControllerError> {
    match get(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}
