//! CNI exec client
//!
//! Invokes plugin binaries with the `CNI_*` environment and the network
//! configuration on stdin, as libcni does. Successful ADD results are cached
//! in libcni's layout (`<cache_dir>/results/<network>-<container>-<ifname>`)
//! and handed back to the chain as `prevResult` on DEL.

use crate::cni_trait::CniClientTrait;
use crate::error::CniError;
use crate::models::{CniErrorObject, CniRequest, CniResult, NetworkConfigList};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Error code used when a plugin fails without printing an error object.
const UNKNOWN_PLUGIN_ERROR: u32 = 999;

/// Kind tag libcni writes into its result cache entries.
const CACHE_KIND: &str = "cniCacheV1";

/// Executes CNI plugins found in a set of binary directories.
#[derive(Debug, Clone)]
pub struct CniExecClient {
    bin_dirs: Vec<PathBuf>,
    timeout: Duration,
    cache_dir: Option<PathBuf>,
}

impl CniExecClient {
    /// Create a new exec client
    ///
    /// # Arguments
    /// * `bin_dirs` - Directories searched for plugin binaries, in order (`CNI_PATH`)
    /// * `timeout` - Upper bound for a single plugin invocation
    pub fn new(bin_dirs: Vec<PathBuf>, timeout: Duration) -> Self {
        Self {
            bin_dirs,
            timeout,
            cache_dir: None,
        }
    }

    /// Cache ADD results under `dir` (libcni uses `/var/lib/cni`)
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Directories searched for plugin binaries
    pub fn bin_dirs(&self) -> &[PathBuf] {
        &self.bin_dirs
    }

    fn find_plugin(&self, plugin_type: &str) -> Result<PathBuf, CniError> {
        if plugin_type.contains('/') || plugin_type.contains("..") {
            return Err(CniError::InvalidConfig(format!("invalid plugin type: {plugin_type}")));
        }
        self.bin_dirs
            .iter()
            .map(|dir| dir.join(plugin_type))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| CniError::PluginNotFound(plugin_type.to_string()))
    }

    fn cache_path(&self, config: &NetworkConfigList, request: &CniRequest) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| {
            dir.join("results")
                .join(format!("{}-{}-{}", config.name, request.container_id, request.ifname))
        })
    }

    async fn store_result(&self, path: &Path, config: &NetworkConfigList, request: &CniRequest, result: &Value) {
        let entry = serde_json::json!({
            "kind": CACHE_KIND,
            "containerId": request.container_id,
            "ifName": request.ifname,
            "networkName": config.name,
            "result": result,
        });
        let written = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, serde_json::to_vec(&entry)?).await?;
            Ok::<(), CniError>(())
        };
        if let Err(e) = written.await {
            warn!("Failed to cache CNI result at {}: {}", path.display(), e);
        }
    }

    async fn exec(
        &self,
        command: &str,
        plugin_type: &str,
        stdin: &Value,
        request: &CniRequest,
    ) -> Result<Vec<u8>, CniError> {
        let path = self.find_plugin(plugin_type)?;
        let payload = serde_json::to_vec(stdin)?;
        let cni_path = std::env::join_paths(&self.bin_dirs)
            .map_err(|e| CniError::InvalidConfig(format!("invalid CNI_PATH: {e}")))?;

        debug!(
            "CNI {} {} (container {}, ifname {})",
            command, plugin_type, request.container_id, request.ifname
        );

        let mut child = Command::new(&path)
            .env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", &request.container_id)
            .env("CNI_NETNS", &request.netns)
            .env("CNI_IFNAME", &request.ifname)
            .env("CNI_ARGS", request.cni_args_env())
            .env("CNI_PATH", cni_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut pipe) = child.stdin.take() {
            // A plugin may exit before reading its config; its exit status tells the story.
            if let Err(e) = pipe.write_all(&payload).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(CniError::Exec(e));
                }
            }
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => return Err(CniError::Timeout(plugin_type.to_string())),
        };

        if output.status.success() {
            return Ok(output.stdout);
        }

        Err(decode_plugin_error(
            plugin_type,
            &output.stdout,
            &output.stderr,
            output.status.code(),
        ))
    }
}

fn decode_plugin_error(plugin_type: &str, stdout: &[u8], stderr: &[u8], status: Option<i32>) -> CniError {
    if let Ok(object) = serde_json::from_slice::<CniErrorObject>(stdout) {
        if !object.msg.is_empty() {
            let msg = match object.details {
                Some(details) if !details.is_empty() => format!("{}: {}", object.msg, details),
                _ => object.msg,
            };
            return CniError::Plugin {
                plugin: plugin_type.to_string(),
                code: object.code,
                msg,
            };
        }
    }

    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    let msg = if stderr.is_empty() {
        match status {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    } else {
        stderr
    };
    CniError::Plugin {
        plugin: plugin_type.to_string(),
        code: UNKNOWN_PLUGIN_ERROR,
        msg,
    }
}

#[async_trait::async_trait]
impl CniClientTrait for CniExecClient {
    async fn add(&self, config: &NetworkConfigList, request: &CniRequest) -> Result<CniResult, CniError> {
        let plugin_types: Vec<String> = config.plugin_types().map(str::to_string).collect();
        let mut prev_result: Option<Value> = None;

        for (index, plugin_type) in plugin_types.iter().enumerate() {
            let stdin = config.plugin_config(index, request, prev_result.as_ref())?;
            let stdout = self.exec("ADD", plugin_type, &stdin, request).await?;
            let result: Value = serde_json::from_slice(&stdout)?;
            prev_result = Some(result);
        }

        let result = prev_result
            .ok_or_else(|| CniError::InvalidConfig(format!("network {} has no plugins", config.name)))?;
        if let Some(path) = self.cache_path(config, request) {
            self.store_result(&path, config, request, &result).await;
        }
        Ok(serde_json::from_value(result)?)
    }

    async fn del(&self, config: &NetworkConfigList, request: &CniRequest) -> Result<(), CniError> {
        let plugin_types: Vec<String> = config.plugin_types().map(str::to_string).collect();
        let cache_path = self.cache_path(config, request);
        let prev_result = match &cache_path {
            Some(path) if config.prev_result_on_del() => cached_result(path).await,
            _ => None,
        };
        let mut first_error = None;

        // Every plugin gets its DEL even if an earlier one failed, so IPAM is released.
        for (index, plugin_type) in plugin_types.iter().enumerate().rev() {
            let stdin = config.plugin_config(index, request, prev_result.as_ref())?;
            if let Err(e) = self.exec("DEL", plugin_type, &stdin, request).await {
                warn!("CNI DEL {} failed for {}: {}", plugin_type, request.ifname, e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if let Some(path) = cache_path {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to drop cached CNI result {}: {}", path.display(), e);
                }
            }
        }
        Ok(())
    }
}

/// The `result` of a cache entry, if one exists and is readable.
async fn cached_result(path: &Path) -> Option<Value> {
    let raw = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice::<Value>(&raw) {
        Ok(mut entry) => entry.get_mut("result").map(Value::take).filter(|result| !result.is_null()),
        Err(e) => {
            warn!("Ignoring unreadable CNI cache entry {}: {}", path.display(), e);
            None
        }
    }
}
