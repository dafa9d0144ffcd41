//! Tool exposure policy: profiles, allow/deny lists, and owner-only
//! tools.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;

/// Named tool profiles, smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolProfile {
    Minimal,
    Coding,
    Messaging,
    Full,
}

impl ToolProfile {
    pub fn parse(s: &str) -> ToolProfile {
        match s {
            "minimal" => ToolProfile::Minimal,
            "coding" => ToolProfile::Coding,
            "messaging" => ToolProfile::Messaging,
            _ => ToolProfile::Full,
        }
    }
}

/// `group:<name>` expansions accepted in allow/deny lists.
pub const TOOL_GROUPS: &[(&str, &[&str])] = &[
    ("group:sessions", &["spawn", "send", "list"]),
    ("group:automation", &["gateway", "cron"]),
    ("group:memory", &["memory_search", "memory_store", "memory_delete"]),
    ("group:browser", &["browser_open", "browser_navigate", "browser_screenshot"]),
];

/// Tools that only the configured owner identity may use.
fn owner_only_tools() -> &'static [&'static str] {
    &["whatsapp_login"]
}

pub fn expand_group(group_name: &str) -> Vec<String> {
    TOOL_GROUPS
        .iter()
        .find(|(name, _)| *name == group_name)
        .map(|(_, tools)| tools.iter().map(|t| t.to_string()).collect())
        .unwrap_or_default()
}

fn profile_tools(profile: ToolProfile) -> HashSet<String> {
    let mut tools: HashSet<String> = ["help", "version", "health"]
        .into_iter()
        .map(String::from)
        .collect();
    if profile == ToolProfile::Minimal {
        return tools;
    }

    for t in ["code_search", "code_edit", "file_read", "file_write", "shell", "git"] {
        tools.insert(t.to_string());
    }
    if profile == ToolProfile::Coding {
        return tools;
    }

    tools.extend(expand_group("group:sessions"));
    tools.insert("send_message".to_string());
    tools.insert("broadcast".to_string());
    if profile == ToolProfile::Messaging {
        return tools;
    }

    for (_, group) in TOOL_GROUPS {
        tools.extend(group.iter().map(|t| t.to_string()));
    }
    tools.extend(owner_only_tools().iter().map(|t| t.to_string()));
    tools
}

struct PolicyState {
    profile: ToolProfile,
    allow: HashSet<String>,
    deny: HashSet<String>,
    owner_identity: Option<String>,
}

/// Decides whether a tool may run for a given caller identity.
/// Precedence: explicit deny, then owner-only gating, then explicit
/// allow, then the active profile.
pub struct ToolPolicy {
    state: RwLock<PolicyState>,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        ToolPolicy {
            state: RwLock::new(PolicyState {
                profile: ToolProfile::Full,
                allow: HashSet::new(),
                deny: HashSet::new(),
                owner_identity: None,
            }),
        }
    }
}

impl ToolPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `tools.profile`, `tools.allow`, and `tools.deny` settings,
    /// expanding `group:` entries.
    pub fn configure(&self, settings: &Value) {
        let mut state = self.state.write();

        if let Some(profile) = settings.get("tools.profile").and_then(Value::as_str) {
            state.profile = ToolProfile::parse(profile);
        }

        let load_list = |key: &str, target: &mut HashSet<String>| {
            let Some(items) = settings.get(key).and_then(Value::as_array) else {
                return;
            };
            for item in items {
                let Some(name) = item.as_str() else { continue };
                if name.starts_with("group:") {
                    target.extend(expand_group(name));
                } else {
                    target.insert(name.to_string());
                }
            }
        };

        load_list("tools.allow", &mut state.allow);
        load_list("tools.deny", &mut state.deny);

        log::debug!(
            "ToolPolicy configured: profile={:?}, allow={}, deny={}",
            state.profile,
            state.allow.len(),
            state.deny.len()
        );
    }

    pub fn set_profile(&self, profile: ToolProfile) {
        self.state.write().profile = profile;
    }

    pub fn set_owner(&self, identity: &str) {
        self.state.write().owner_identity = Some(identity.to_string());
    }

    pub fn allow(&self, tool_name: &str) {
        self.state.write().allow.insert(tool_name.to_string());
    }

    pub fn deny(&self, tool_name: &str) {
        self.state.write().deny.insert(tool_name.to_string());
    }

    pub fn is_owner(&self, identity: &str) -> bool {
        self.state
            .read()
            .owner_identity
            .as_deref()
            .map(|owner| owner == identity)
            .unwrap_or(false)
    }

    pub fn is_allowed(&self, tool_name: &str, identity: &str) -> bool {
        let state = self.state.read();

        if state.deny.contains(tool_name) {
            return false;
        }

        if owner_only_tools().contains(&tool_name) {
            return state
                .owner_identity
                .as_deref()
                .map(|owner| owner == identity)
                .unwrap_or(false);
        }

        if state.allow.contains(tool_name) {
            return true;
        }

        profile_tools(state.profile).contains(tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn profiles_nest() {
        let minimal = profile_tools(ToolProfile::Minimal);
        let coding = profile_tools(ToolProfile::Coding);
        let messaging = profile_tools(ToolProfile::Messaging);
        let full = profile_tools(ToolProfile::Full);

        assert!(minimal.contains("help"));
        assert!(!minimal.contains("shell"));
        assert!(coding.contains("shell"));
        assert!(!coding.contains("send_message"));
        assert!(messaging.contains("send_message"));
        assert!(messaging.contains("spawn"));
        assert!(!messaging.contains("browser_open"));
        assert!(full.contains("browser_open"));
        assert!(full.contains("whatsapp_login"));

        assert!(minimal.is_subset(&coding));
        assert!(coding.is_subset(&messaging));
        assert!(messaging.is_subset(&full));
    }

    #[test]
    fn deny_beats_everything() {
        let policy = ToolPolicy::new();
        policy.deny("shell");
        policy.allow("shell");
        assert!(!policy.is_allowed("shell", "anyone"));
    }

    #[test]
    fn owner_only_tools_need_owner() {
        let policy = ToolPolicy::new();
        assert!(!policy.is_allowed("whatsapp_login", "stranger"));

        policy.set_owner("admin@local");
        assert!(policy.is_allowed("whatsapp_login", "admin@local"));
        assert!(!policy.is_allowed("whatsapp_login", "stranger"));
    }

    #[test]
    fn allow_overrides_profile() {
        let policy = ToolPolicy::new();
        policy.set_profile(ToolProfile::Minimal);
        assert!(!policy.is_allowed("shell", "u"));
        policy.allow("shell");
        assert!(policy.is_allowed("shell", "u"));
    }

    #[test]
    fn configure_expands_groups() {
        let policy = ToolPolicy::new();
        policy.configure(&json!({
            "tools.profile": "minimal",
            "tools.allow": ["group:browser", "git"],
            "tools.deny": ["health"],
        }));

        assert!(policy.is_allowed("browser_open", "u"));
        assert!(policy.is_allowed("git", "u"));
        assert!(!policy.is_allowed("health", "u"));
        assert!(policy.is_allowed("help", "u"));
        assert!(!policy.is_allowed("shell", "u"));
    }

    #[test]
    fn unknown_group_expands_to_nothing() {
        assert!(expand_group("group:nonsense").is_empty());
    }
}
