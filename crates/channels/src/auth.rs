//! Channel authorization policy shared across bot integrations.

use serde::{Deserialize, Serialize};

/// Per-channel authorization for inbound messages.
///
/// DM policy applies to private chats (chat ids not starting with `-`),
/// the group allowlist to group chats (`-` prefix). An empty group
/// allowlist admits every group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAuthPolicy {
    /// `"open"` (allow all), `"allowlist"`, or `"pairing"` (deny until
    /// paired).
    #[serde(default = "default_dm_policy")]
    pub dm_policy: String,
    #[serde(default)]
    pub allowed_sender_ids: Vec<String>,
    #[serde(default)]
    pub group_allowlist: Vec<String>,
}

fn default_dm_policy() -> String {
    "open".to_string()
}

impl Default for ChannelAuthPolicy {
    fn default() -> Self {
        ChannelAuthPolicy {
            dm_policy: default_dm_policy(),
            allowed_sender_ids: Vec::new(),
            group_allowlist: Vec::new(),
        }
    }
}

impl ChannelAuthPolicy {
    pub fn is_dm_authorized(&self, sender_id: &str) -> bool {
        match self.dm_policy.as_str() {
            "open" => true,
            "allowlist" => self.allowed_sender_ids.iter().any(|id| id == sender_id),
            // "pairing" or anything unrecognized denies.
            _ => false,
        }
    }

    pub fn is_group_authorized(&self, group_id: &str) -> bool {
        self.group_allowlist.is_empty() || self.group_allowlist.iter().any(|id| id == group_id)
    }

    /// Combined check for an inbound event. Group chats are identified by
    /// the `-` chat-id prefix convention.
    pub fn authorize_event(
        &self,
        sender_id: &str,
        chat_id: &str,
        event_type: &str,
        channel_name: &str,
    ) -> bool {
        if !chat_id.is_empty() && !chat_id.starts_with('-') && !self.is_dm_authorized(sender_id) {
            log::debug!("[{channel_name}] Event '{event_type}' from {sender_id} blocked by dm_policy");
            return false;
        }
        if chat_id.starts_with('-') && !self.is_group_authorized(chat_id) {
            log::debug!(
                "[{channel_name}] Event '{event_type}' in group {chat_id} blocked by group_allowlist"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(dm: &str, senders: &[&str], groups: &[&str]) -> ChannelAuthPolicy {
        ChannelAuthPolicy {
            dm_policy: dm.to_string(),
            allowed_sender_ids: senders.iter().map(|s| s.to_string()).collect(),
            group_allowlist: groups.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn open_policy_allows_everyone() {
        let p = policy("open", &[], &[]);
        assert!(p.is_dm_authorized("anyone"));
        assert!(p.authorize_event("anyone", "12345", "message", "tg"));
    }

    #[test]
    fn allowlist_policy_checks_sender() {
        let p = policy("allowlist", &["42"], &[]);
        assert!(p.is_dm_authorized("42"));
        assert!(!p.is_dm_authorized("43"));
        assert!(!p.authorize_event("43", "99", "message", "tg"));
    }

    #[test]
    fn pairing_policy_denies() {
        let p = policy("pairing", &["42"], &[]);
        assert!(!p.is_dm_authorized("42"));
    }

    #[test]
    fn unknown_policy_denies() {
        let p = policy("whatever", &[], &[]);
        assert!(!p.is_dm_authorized("42"));
    }

    #[test]
    fn empty_group_allowlist_admits_all_groups() {
        let p = policy("pairing", &[], &[]);
        // DM policy is irrelevant for group chats.
        assert!(p.authorize_event("anyone", "-1001234", "message", "tg"));
    }

    #[test]
    fn group_allowlist_filters_groups() {
        let p = policy("open", &[], &["-100A"]);
        assert!(p.authorize_event("u", "-100A", "message", "tg"));
        assert!(!p.authorize_event("u", "-100B", "message", "tg"));
    }
}
