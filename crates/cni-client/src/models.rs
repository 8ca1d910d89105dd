//! CNI protocol models
//!
//! These models follow the CNI specification's network configuration and
//! result formats (0.3.0 and later).

use crate::error::CniError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Version assumed when a configuration does not declare one.
pub const DEFAULT_CNI_VERSION: &str = "0.3.1";

/// A network configuration normalized into plugin-list form.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfigList {
    /// Network name handed to every plugin
    pub name: String,
    /// CNI version handed to every plugin
    pub cni_version: String,
    /// Plugin configurations, in ADD order
    pub plugins: Vec<Map<String, Value>>,
}

impl NetworkConfigList {
    /// Parse raw CNI configuration JSON.
    ///
    /// Accepts both a single plugin configuration and a `plugins` list.
    /// `fallback_name` is used when the configuration carries no `name`,
    /// which is common for configs embedded in attachment definitions.
    pub fn parse(raw: &str, fallback_name: &str) -> Result<Self, CniError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut root) = value else {
            return Err(CniError::InvalidConfig("configuration is not a JSON object".to_string()));
        };

        let name = root
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(fallback_name)
            .to_string();
        let cni_version = root
            .get("cniVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_CNI_VERSION)
            .to_string();

        let plugins = match root.remove("plugins") {
            Some(Value::Array(entries)) => entries
                .into_iter()
                .map(|entry| match entry {
                    Value::Object(plugin) => Ok(plugin),
                    _ => Err(CniError::InvalidConfig("plugin entry is not an object".to_string())),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(CniError::InvalidConfig("`plugins` must be a list".to_string()));
            }
            None => vec![root],
        };

        if plugins.is_empty() {
            return Err(CniError::InvalidConfig("plugin list is empty".to_string()));
        }
        for plugin in &plugins {
            if plugin_type(plugin).is_none() {
                return Err(CniError::InvalidConfig("plugin is missing `type`".to_string()));
            }
        }

        Ok(Self {
            name,
            cni_version,
            plugins,
        })
    }

    /// Build the stdin payload for the plugin at `index`.
    pub fn plugin_config(
        &self,
        index: usize,
        request: &CniRequest,
        prev_result: Option<&Value>,
    ) -> Result<Value, CniError> {
        let mut plugin = self
            .plugins
            .get(index)
            .cloned()
            .ok_or_else(|| CniError::InvalidConfig(format!("no plugin at index {index}")))?;

        plugin.insert("name".to_string(), Value::String(self.name.clone()));
        plugin.insert("cniVersion".to_string(), Value::String(self.cni_version.clone()));

        let runtime_config = request.runtime_config.for_capabilities(plugin.get("capabilities"));
        if !runtime_config.is_empty() {
            plugin.insert("runtimeConfig".to_string(), Value::Object(runtime_config));
        }

        if let Some(cni_args) = &request.cni_args {
            let mut args = Map::new();
            args.insert("cni".to_string(), Value::Object(cni_args.clone()));
            plugin.insert("args".to_string(), Value::Object(args));
        }

        if let Some(prev) = prev_result {
            plugin.insert("prevResult".to_string(), prev.clone());
        }

        Ok(Value::Object(plugin))
    }

    /// Whether DEL carries the cached ADD result (CNI 0.4.0 and later).
    pub fn prev_result_on_del(&self) -> bool {
        let mut parts = self.cni_version.split('.').map(|part| part.parse::<u32>().unwrap_or(0));
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);
        (major, minor) >= (0, 4)
    }

    /// Plugin type names, in ADD order.
    pub fn plugin_types(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().filter_map(plugin_type)
    }
}

fn plugin_type(plugin: &Map<String, Value>) -> Option<&str> {
    plugin.get("type").and_then(Value::as_str).filter(|t| !t.is_empty())
}

/// Capability arguments a runtime may pass through `runtimeConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Static IP requests (`ips` capability)
    pub ips: Vec<String>,
    /// Requested MAC address (`mac` capability)
    pub mac: Option<String>,
}

impl RuntimeConfig {
    /// Entries whose capability the plugin declares as enabled.
    fn for_capabilities(&self, capabilities: Option<&Value>) -> Map<String, Value> {
        let enabled = |name: &str| {
            capabilities
                .and_then(|caps| caps.get(name))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };

        let mut config = Map::new();
        if !self.ips.is_empty() && enabled("ips") {
            config.insert(
                "ips".to_string(),
                Value::Array(self.ips.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(mac) = &self.mac {
            if enabled("mac") {
                config.insert("mac".to_string(), Value::String(mac.clone()));
            }
        }
        config
    }
}

/// Per-invocation parameters of a CNI call.
#[derive(Debug, Clone, PartialEq)]
pub struct CniRequest {
    /// `CNI_CONTAINERID`
    pub container_id: String,
    /// `CNI_NETNS`
    pub netns: PathBuf,
    /// `CNI_IFNAME`
    pub ifname: String,
    /// `CNI_ARGS` key/value pairs
    pub args: Vec<(String, String)>,
    /// Capability arguments
    pub runtime_config: RuntimeConfig,
    /// Free-form arguments passed as `args.cni`
    pub cni_args: Option<Map<String, Value>>,
}

impl CniRequest {
    /// Create a request with no extra arguments.
    pub fn new(container_id: impl Into<String>, netns: impl Into<PathBuf>, ifname: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            netns: netns.into(),
            ifname: ifname.into(),
            args: Vec::new(),
            runtime_config: RuntimeConfig::default(),
            cni_args: None,
        }
    }

    /// Render `args` as the `CNI_ARGS` environment value.
    pub fn cni_args_env(&self) -> String {
        self.args
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Result returned by a successful ADD.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    /// Version of the result format
    #[serde(default)]
    pub cni_version: String,
    /// Interfaces created or touched by the chain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<CniInterface>,
    /// Assigned addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<CniIpConfig>,
    /// Installed routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Value>,
    /// DNS configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Value>,
}

impl CniResult {
    /// The interface named `ifname` inside the sandbox, if reported.
    pub fn sandbox_interface(&self, ifname: &str) -> Option<&CniInterface> {
        self.interfaces
            .iter()
            .find(|iface| iface.name == ifname && iface.sandbox.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// Addresses assigned to `ifname`, without prefix length.
    ///
    /// IP entries that do not reference an interface are attributed to it.
    pub fn addresses_for(&self, ifname: &str) -> Vec<String> {
        self.ips_for(ifname)
            .map(|ip| strip_prefix_len(&ip.address).to_string())
            .collect()
    }

    /// Gateways reported for `ifname`.
    pub fn gateways_for(&self, ifname: &str) -> Vec<String> {
        self.ips_for(ifname).filter_map(|ip| ip.gateway.clone()).collect()
    }

    fn ips_for<'a>(&'a self, ifname: &'a str) -> impl Iterator<Item = &'a CniIpConfig> + 'a {
        self.ips.iter().filter(move |ip| match ip.interface {
            Some(index) => self.interfaces.get(index).is_some_and(|iface| iface.name == ifname),
            None => true,
        })
    }
}

fn strip_prefix_len(address: &str) -> &str {
    address.split_once('/').map_or(address, |(addr, _)| addr)
}

/// Interface entry of a CNI result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CniInterface {
    /// Interface name
    pub name: String,
    /// Hardware address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Netns path when the interface lives in the sandbox
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

/// IP entry of a CNI result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CniIpConfig {
    /// Address in CIDR notation
    pub address: String,
    /// Gateway address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Index into `interfaces`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
}

/// Error object a plugin prints on failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CniErrorObject {
    /// CNI error code
    #[serde(default)]
    pub code: u32,
    /// Short message
    #[serde(default)]
    pub msg: String,
    /// Additional details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
