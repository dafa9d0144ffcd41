//! Sandbox network-mode validation.
//!
//! `host` joins the host network namespace and is always blocked.
//! `container:<id>` joins another container's namespace and is blocked
//! unless the operator sets the break-glass flag.

/// Why a requested network mode is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkModeBlockReason {
    Host,
    ContainerNamespaceJoin,
}

/// Trim and lowercase a mode string. Idempotent.
pub fn normalize_network_mode(mode: &str) -> String {
    mode.trim().to_ascii_lowercase()
}

pub fn get_blocked_network_mode_reason(mode: &str) -> Option<NetworkModeBlockReason> {
    let normalized = normalize_network_mode(mode);
    if normalized == "host" {
        return Some(NetworkModeBlockReason::Host);
    }
    if normalized.starts_with("container:") {
        return Some(NetworkModeBlockReason::ContainerNamespaceJoin);
    }
    None
}

pub fn is_dangerous_network_mode(mode: &str) -> bool {
    get_blocked_network_mode_reason(mode).is_some()
}

/// Whether `mode` is acceptable.
pub fn validate_sandbox_network_mode(
    mode: &str,
    dangerously_allow_container_namespace_join: bool,
) -> bool {
    match get_blocked_network_mode_reason(mode) {
        None => true,
        Some(NetworkModeBlockReason::Host) => false,
        Some(NetworkModeBlockReason::ContainerNamespaceJoin) => {
            dangerously_allow_container_namespace_join
        }
    }
}
