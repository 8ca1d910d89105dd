//! Annotation parsers
//!
//! Turns the raw `networks` and `network-status` annotation text into the
//! normalized model. Both parsers are pure: the same input always yields the
//! same output, and nothing is coerced into validity.

use crate::error::ControllerError;
use crate::model::{ActualState, AttachedInterface, AttachmentRequest};
use crds::{NetworkRef, NetworkSelectionElement, NetworkStatus};
use std::collections::HashSet;
use std::net::IpAddr;

/// Longest interface name the kernel accepts (IFNAMSIZ minus the terminator).
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Longest DNS-1123 label.
const MAX_LABEL_LEN: usize = 63;

fn malformed(msg: impl Into<String>) -> ControllerError {
    ControllerError::MalformedAnnotation(msg.into())
}

/// Parse the desired-state annotation.
///
/// Accepts a JSON array of selection elements or the comma-separated
/// shorthand `[namespace/]name[@interface]`. Absent or blank input is an
/// empty list.
pub fn parse_desired(raw: Option<&str>, pod_namespace: &str) -> Result<Vec<AttachmentRequest>, ControllerError> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(Vec::new()),
    };

    let elements = if raw.starts_with('[') {
        serde_json::from_str::<Vec<NetworkSelectionElement>>(raw)
            .map_err(|e| malformed(format!("networks annotation is not a valid selection list: {e}")))?
    } else {
        parse_shorthand(raw)?
    };

    let mut requests = Vec::with_capacity(elements.len());
    let mut seen = HashSet::new();
    for element in elements {
        let request = to_request(element, pod_namespace)?;
        if let Some(key) = request.key() {
            if !seen.insert(key.clone()) {
                return Err(malformed(format!("duplicate attachment {key} in networks annotation")));
            }
        }
        requests.push(request);
    }
    Ok(requests)
}

fn parse_shorthand(raw: &str) -> Result<Vec<NetworkSelectionElement>, ControllerError> {
    raw.split(',')
        .map(str::trim)
        .map(|item| {
            if item.is_empty() {
                return Err(malformed("empty entry in networks annotation"));
            }
            let (reference, interface) = match item.split_once('@') {
                Some((reference, interface)) => (reference, Some(interface.to_string())),
                None => (item, None),
            };
            let (namespace, name) = match reference.split_once('/') {
                Some((namespace, name)) => (Some(namespace.to_string()), name),
                None => (None, reference),
            };
            if namespace.as_deref() == Some("") || name.contains('/') {
                return Err(malformed(format!("invalid network reference {item:?}")));
            }
            Ok(NetworkSelectionElement {
                name: name.to_string(),
                namespace,
                interface_request: interface,
                ..Default::default()
            })
        })
        .collect()
}

fn to_request(element: NetworkSelectionElement, pod_namespace: &str) -> Result<AttachmentRequest, ControllerError> {
    let name = element.name.trim();
    if name.is_empty() {
        return Err(malformed("network selection element without a name"));
    }
    let namespace = element
        .namespace
        .as_deref()
        .map(str::trim)
        .filter(|namespace| !namespace.is_empty())
        .unwrap_or(pod_namespace);
    validate_label("network name", name)?;
    validate_label("namespace", namespace)?;
    let network = NetworkRef::new(namespace, name);

    let interface = element
        .interface_request
        .map(|interface| interface.trim().to_string())
        .filter(|interface| !interface.is_empty());
    if let Some(interface) = &interface {
        validate_interface_name(interface)?;
    }

    let ips = element.ip_request.unwrap_or_default();
    for ip in &ips {
        validate_ip_request(ip)?;
    }

    if let Some(mac) = &element.mac_request {
        validate_mac(mac)?;
    }

    let default_route = element.gateway_request.unwrap_or_default();
    for gateway in &default_route {
        gateway
            .parse::<IpAddr>()
            .map_err(|_| malformed(format!("invalid default-route gateway {gateway:?} for {network}")))?;
    }

    Ok(AttachmentRequest {
        network,
        interface,
        ips,
        mac: element.mac_request,
        default_route,
        cni_args: element.cni_args,
    })
}

/// `name` must match `^[a-z0-9]([-a-z0-9]*[a-z0-9])?$`.
fn validate_label(what: &str, name: &str) -> Result<(), ControllerError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_LABEL_LEN
        && name.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(malformed(format!("invalid {what} {name:?}")))
    }
}

fn validate_interface_name(name: &str) -> Result<(), ControllerError> {
    let valid = name.len() <= MAX_INTERFACE_NAME_LEN
        && name != "."
        && name != ".."
        && !name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace());
    if valid {
        Ok(())
    } else {
        Err(malformed(format!("invalid interface name {name:?}")))
    }
}

fn validate_mac(mac: &str) -> Result<(), ControllerError> {
    let octets: Vec<&str> = mac.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));
    if valid {
        Ok(())
    } else {
        Err(malformed(format!("invalid MAC address {mac:?}")))
    }
}

fn validate_ip_request(value: &str) -> Result<(), ControllerError> {
    let invalid = || malformed(format!("invalid IP request {value:?}"));
    let (address, prefix) = match value.split_once('/') {
        Some((address, prefix)) => (address, Some(prefix)),
        None => (value, None),
    };
    let address: IpAddr = address.parse().map_err(|_| invalid())?;
    if let Some(prefix) = prefix {
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if address.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Parse the network status annotation.
///
/// Entries marked `default` are the primary network and are kept apart;
/// every other entry must name an interface.
pub fn parse_actual(raw: Option<&str>, pod_namespace: &str) -> Result<ActualState, ControllerError> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(ActualState::default()),
    };

    let entries: Vec<NetworkStatus> = serde_json::from_str(raw)
        .map_err(|e| malformed(format!("network-status annotation is not a valid status list: {e}")))?;

    let mut state = ActualState::default();
    let mut seen = HashSet::new();
    for entry in entries {
        if entry.default {
            state.primary.push(entry);
            continue;
        }
        let interface = entry
            .interface
            .clone()
            .filter(|interface| !interface.is_empty())
            .ok_or_else(|| malformed(format!("network-status entry {} has no interface", entry.name)))?;
        let network = NetworkRef::parse_qualified(&entry.name, pod_namespace)
            .ok_or_else(|| malformed(format!("invalid network name {:?} in network-status", entry.name)))?;
        let attached = AttachedInterface {
            network,
            interface,
            status: entry,
        };
        if !seen.insert(attached.key()) {
            return Err(malformed(format!(
                "duplicate attachment {} in network-status annotation",
                attached.key()
            )));
        }
        state.attachments.push(attached);
    }
    Ok(state)
}

/// Render actual state as network status annotation text.
pub fn render_actual(state: &ActualState) -> Result<String, ControllerError> {
    serde_json::to_string_pretty(&state.to_statuses())
        .map_err(|e| ControllerError::InvalidConfig(format!("failed to encode network-status: {e}")))
}
