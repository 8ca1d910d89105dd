//! Exec protocol tests against throwaway shell-script plugins.

#![cfg(unix)]

use cni_client::{CniClientTrait, CniError, CniExecClient, CniRequest, NetworkConfigList};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BRIDGE_PLUGIN: &str = r#"#!/bin/sh
cat > /dev/null
if [ "$CNI_COMMAND" = "ADD" ]; then
  printf '{"cniVersion":"0.3.1","interfaces":[{"name":"%s","mac":"0a:58:0a:0a:0a:6f","sandbox":"%s"}],"ips":[{"address":"10.10.10.111/24","gateway":"10.10.10.1","interface":0}]}' "$CNI_IFNAME" "$CNI_NETNS"
fi
echo "$CNI_COMMAND $CNI_IFNAME $CNI_ARGS" >> "$(dirname "$0")/calls.log"
"#;

const RECORDING_PLUGIN: &str = r#"#!/bin/sh
cat > "$(dirname "$0")/recorder.stdin"
if [ "$CNI_COMMAND" = "ADD" ]; then
  printf '{"cniVersion":"0.3.1","interfaces":[{"name":"%s","mac":"0a:58:0a:0a:0a:6f","sandbox":"%s"}],"ips":[{"address":"10.10.10.111/24","interface":0}]}' "$CNI_IFNAME" "$CNI_NETNS"
fi
echo "$CNI_COMMAND recorder" >> "$(dirname "$0")/calls.log"
"#;

const FAILING_PLUGIN: &str = r#"#!/bin/sh
cat > /dev/null
printf '{"cniVersion":"0.3.1","code":11,"msg":"address pool exhausted"}'
exit 1
"#;

fn write_plugin(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
}

fn plugin_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cni-client-exec-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    write_plugin(&dir, "fake-bridge", BRIDGE_PLUGIN);
    write_plugin(&dir, "fake-recorder", RECORDING_PLUGIN);
    write_plugin(&dir, "fake-failing", FAILING_PLUGIN);
    dir
}

// One test drives every scenario so no other test thread forks while the
// plugin scripts are still open for writing.
#[tokio::test]
async fn test_exec_protocol() {
    let dir = plugin_dir();
    let client = CniExecClient::new(vec![dir.clone()], Duration::from_secs(10));

    let mut request = CniRequest::new("pod-uid", "/var/run/netns/test", "ens58");
    request.args = vec![("K8S_POD_NAME".to_string(), "tiny-winy-pod".to_string())];

    // Chained ADD threads prevResult into the second plugin.
    let chain = NetworkConfigList::parse(
        r#"{"cniVersion": "0.3.1", "plugins": [{"type": "fake-bridge"}, {"type": "fake-recorder"}]}"#,
        "tenant-network",
    )
    .unwrap();
    let result = client.add(&chain, &request).await.unwrap();
    assert_eq!(result.addresses_for("ens58"), vec!["10.10.10.111"]);
    assert_eq!(
        result.sandbox_interface("ens58").and_then(|iface| iface.mac.clone()),
        Some("0a:58:0a:0a:0a:6f".to_string())
    );

    let recorded: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("recorder.stdin")).unwrap()).unwrap();
    assert_eq!(recorded["name"], "tenant-network");
    assert_eq!(recorded["prevResult"]["ips"][0]["address"], "10.10.10.111/24");

    // DEL runs in reverse order.
    std::fs::remove_file(dir.join("calls.log")).unwrap();
    client.del(&chain, &request).await.unwrap();
    let calls = std::fs::read_to_string(dir.join("calls.log")).unwrap();
    let lines: Vec<&str> = calls.lines().collect();
    assert_eq!(lines, vec!["DEL recorder", "DEL ens58 K8S_POD_NAME=tiny-winy-pod"]);

    // Plugin error objects are decoded.
    let failing = NetworkConfigList::parse(r#"{"type": "fake-failing"}"#, "broken").unwrap();
    match client.add(&failing, &request).await {
        Err(CniError::Plugin { code, msg, .. }) => {
            assert_eq!(code, 11);
            assert_eq!(msg, "address pool exhausted");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // Missing binaries are reported by name.
    let missing = NetworkConfigList::parse(r#"{"type": "does-not-exist"}"#, "missing").unwrap();
    assert!(matches!(
        client.add(&missing, &request).await,
        Err(CniError::PluginNotFound(name)) if name == "does-not-exist"
    ));

    // With a result cache, DEL of a 0.4.0 chain receives the ADD result.
    let cache = dir.join("cache");
    let cached_client = CniExecClient::new(vec![dir.clone()], Duration::from_secs(10)).with_cache_dir(&cache);
    let chain_040 = NetworkConfigList::parse(
        r#"{"cniVersion": "0.4.0", "plugins": [{"type": "fake-bridge"}, {"type": "fake-recorder"}]}"#,
        "storage",
    )
    .unwrap();
    cached_client.add(&chain_040, &request).await.unwrap();
    let entry_path = cache.join("results").join("storage-pod-uid-ens58");
    let entry: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&entry_path).unwrap()).unwrap();
    assert_eq!(entry["kind"], "cniCacheV1");
    assert_eq!(entry["result"]["ips"][0]["address"], "10.10.10.111/24");

    cached_client.del(&chain_040, &request).await.unwrap();
    let recorded: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("recorder.stdin")).unwrap()).unwrap();
    assert_eq!(recorded["prevResult"]["ips"][0]["address"], "10.10.10.111/24");
    assert!(!entry_path.exists());

    let _ = std::fs::remove_dir_all(&dir);
}
