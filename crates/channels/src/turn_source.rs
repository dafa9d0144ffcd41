//! Turn-source metadata and reply-route pinning.
//!
//! Session variables are mutable while a turn is in flight; routing a
//! reply off them would let a mid-turn mutation redirect the answer to a
//! different channel or recipient. The metadata captured at the
//! originating message wins whenever it is present.

use serde::{Deserialize, Serialize};

/// Metadata captured when the originating message of a turn is received.
/// Immutable for the lifetime of the turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSourceMetadata {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

fn pick(turn_value: Option<&String>, session_value: &str) -> String {
    match turn_value {
        Some(v) if !v.is_empty() => v.clone(),
        _ => session_value.to_string(),
    }
}

impl TurnSourceMetadata {
    /// The channel replies must go out on.
    pub fn resolve_channel(&self, session_channel: &str) -> String {
        pick(self.channel.as_ref(), session_channel)
    }

    /// The recipient replies must go to.
    pub fn resolve_to(&self, session_to: &str) -> String {
        pick(self.to.as_ref(), session_to)
    }

    /// The account replies must be sent from.
    pub fn resolve_account_id(&self, session_account_id: &str) -> String {
        pick(self.account_id.as_ref(), session_account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_source_wins_when_present() {
        let source = TurnSourceMetadata {
            channel: Some("telegram".into()),
            to: Some("12345".into()),
            account_id: Some("bot-a".into()),
            thread_id: None,
        };
        assert_eq!(source.resolve_channel("discord"), "telegram");
        assert_eq!(source.resolve_to("99999"), "12345");
        assert_eq!(source.resolve_account_id("bot-b"), "bot-a");
    }

    #[test]
    fn session_fields_fill_the_gaps() {
        let source = TurnSourceMetadata::default();
        assert_eq!(source.resolve_channel("discord"), "discord");
        assert_eq!(source.resolve_to("99999"), "99999");
        assert_eq!(source.resolve_account_id("bot-b"), "bot-b");
    }

    #[test]
    fn empty_strings_count_as_absent() {
        let source = TurnSourceMetadata {
            channel: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(source.resolve_channel("discord"), "discord");
    }
}
