//! Mock CNI client for unit testing
//!
//! Keeps an in-memory model of the devices present in each network
//! namespace so tests can assert on what a pass actually wired up or tore
//! down, including devices left behind by failed ADDs.

use crate::cni_trait::CniClientTrait;
use crate::error::CniError;
use crate::models::{CniInterface, CniIpConfig, CniRequest, CniResult, NetworkConfigList};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How an ADD for a given network should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddFailure {
    /// Fail before anything is created
    BeforeCreate,
    /// Create the device, then fail (a later plugin in the chain breaking)
    AfterCreate,
}

/// A device the mock believes exists inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    /// Network that created the device
    pub network: String,
    /// Hardware address
    pub mac: String,
    /// Addresses in CIDR notation
    pub ips: Vec<String>,
}

/// A recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// ADD for (network, ifname)
    Add(String, String),
    /// DEL for (network, ifname)
    Del(String, String),
}

/// Mock CniClient for testing
#[derive(Debug, Clone, Default)]
pub struct MockCniClient {
    devices: Arc<Mutex<HashMap<PathBuf, BTreeMap<String, MockDevice>>>>,
    add_failures: Arc<Mutex<HashMap<String, AddFailure>>>,
    del_failures: Arc<Mutex<HashMap<String, String>>>,
    add_delays: Arc<Mutex<HashMap<String, Duration>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    container_ids: Arc<Mutex<Vec<String>>>,
    next_mac: Arc<Mutex<u8>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockCniClient {
    /// Create a new mock client with no devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Make ADD fail for `network` (test setup)
    pub fn fail_add(&self, network: impl Into<String>, failure: AddFailure) {
        lock(&self.add_failures).insert(network.into(), failure);
    }

    /// Make DEL fail for `network` with `msg` (test setup)
    pub fn fail_del(&self, network: impl Into<String>, msg: impl Into<String>) {
        lock(&self.del_failures).insert(network.into(), msg.into());
    }

    /// Make ADD for `network` hang for `delay` after creating the device (test setup)
    pub fn delay_add(&self, network: impl Into<String>, delay: Duration) {
        lock(&self.add_delays).insert(network.into(), delay);
    }

    /// Place a device in a namespace (test setup)
    pub fn insert_device(&self, netns: impl Into<PathBuf>, ifname: impl Into<String>, device: MockDevice) {
        lock(&self.devices)
            .entry(netns.into())
            .or_default()
            .insert(ifname.into(), device);
    }

    /// Number of devices in `netns`
    pub fn device_count(&self, netns: &Path) -> usize {
        lock(&self.devices).get(netns).map_or(0, BTreeMap::len)
    }

    /// Device `ifname` in `netns`, if present
    pub fn device(&self, netns: &Path, ifname: &str) -> Option<MockDevice> {
        lock(&self.devices).get(netns).and_then(|devices| devices.get(ifname).cloned())
    }

    /// All recorded invocations, in order
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// `CNI_CONTAINERID` of every invocation, in order
    pub fn container_ids(&self) -> Vec<String> {
        lock(&self.container_ids).clone()
    }

    fn record(&self, call: MockCall, request: &CniRequest) {
        lock(&self.calls).push(call);
        lock(&self.container_ids).push(request.container_id.clone());
    }

    fn generate_mac(&self) -> String {
        let mut next = lock(&self.next_mac);
        *next = next.wrapping_add(1);
        format!("02:00:00:00:00:{:02x}", *next)
    }
}

#[async_trait::async_trait]
impl CniClientTrait for MockCniClient {
    async fn add(&self, config: &NetworkConfigList, request: &CniRequest) -> Result<CniResult, CniError> {
        self.record(MockCall::Add(config.name.clone(), request.ifname.clone()), request);

        let failure = lock(&self.add_failures).get(&config.name).copied();
        if failure == Some(AddFailure::BeforeCreate) {
            return Err(CniError::Plugin {
                plugin: "mock".to_string(),
                code: 7,
                msg: format!("network {} rejected the request", config.name),
            });
        }

        let mac = request
            .runtime_config
            .mac
            .clone()
            .unwrap_or_else(|| self.generate_mac());
        let ips = request.runtime_config.ips.clone();

        {
            let mut devices = lock(&self.devices);
            let namespace = devices.entry(request.netns.clone()).or_default();
            if namespace.contains_key(&request.ifname) {
                return Err(CniError::Plugin {
                    plugin: "mock".to_string(),
                    code: 999,
                    msg: format!("device {} already exists", request.ifname),
                });
            }
            namespace.insert(
                request.ifname.clone(),
                MockDevice {
                    network: config.name.clone(),
                    mac: mac.clone(),
                    ips: ips.clone(),
                },
            );
        }

        let delay = lock(&self.add_delays).get(&config.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if failure == Some(AddFailure::AfterCreate) {
            return Err(CniError::Plugin {
                plugin: "mock-chained".to_string(),
                code: 999,
                msg: format!("chained plugin failed for {}", config.name),
            });
        }

        Ok(CniResult {
            cni_version: config.cni_version.clone(),
            interfaces: vec![CniInterface {
                name: request.ifname.clone(),
                mac: Some(mac),
                sandbox: Some(request.netns.display().to_string()),
            }],
            ips: ips
                .into_iter()
                .map(|address| CniIpConfig {
                    address,
                    gateway: None,
                    interface: Some(0),
                })
                .collect(),
            routes: Vec::new(),
            dns: None,
        })
    }

    async fn del(&self, config: &NetworkConfigList, request: &CniRequest) -> Result<(), CniError> {
        self.record(MockCall::Del(config.name.clone(), request.ifname.clone()), request);

        if let Some(msg) = lock(&self.del_failures).get(&config.name) {
            return Err(CniError::Plugin {
                plugin: "mock".to_string(),
                code: 999,
                msg: msg.clone(),
            });
        }

        if let Some(namespace) = lock(&self.devices).get_mut(&request.netns) {
            namespace.remove(&request.ifname);
        }
        Ok(())
    }
}
