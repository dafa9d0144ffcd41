//! Heartbeat delivery gating.
//!
//! The agent can send a periodic heartbeat message to a configured
//! target. Direct messages are suppressible by policy; group and channel
//! targets never block. Target ids encode their chat type differently on
//! every platform, so classification is per-channel.

use serde::{Deserialize, Serialize};

/// What kind of chat a target id denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
    Channel,
    Unknown,
}

/// Heartbeat delivery policy for direct chats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatPolicy {
    Allow,
    Block,
}

pub fn infer_telegram_target_chat_type(target: &str) -> ChatType {
    if target.is_empty() {
        return ChatType::Unknown;
    }
    if target.starts_with('-') {
        // -100... marks channels and supergroups.
        if target.starts_with("-100") {
            return ChatType::Channel;
        }
        return ChatType::Group;
    }
    if target.chars().all(|c| c.is_ascii_digit()) {
        return ChatType::Direct;
    }
    if target.starts_with('@') {
        return ChatType::Channel;
    }
    ChatType::Unknown
}

pub fn infer_discord_target_chat_type(target: &str, is_dm: bool) -> ChatType {
    if target.is_empty() {
        return ChatType::Unknown;
    }
    // Discord ids don't encode DM vs channel; the hint must come from
    // the caller.
    if is_dm { ChatType::Direct } else { ChatType::Channel }
}

pub fn infer_slack_target_chat_type(target: &str) -> ChatType {
    match target.chars().next() {
        Some('D') => ChatType::Direct,
        Some('C') => ChatType::Channel,
        Some('G') => ChatType::Group,
        _ => ChatType::Unknown,
    }
}

pub fn infer_whatsapp_target_chat_type(target: &str) -> ChatType {
    if target.is_empty() {
        return ChatType::Unknown;
    }
    if target.contains("@g.us") {
        return ChatType::Group;
    }
    if target.contains("@s.whatsapp.net") {
        return ChatType::Direct;
    }
    if target.contains("@broadcast") {
        return ChatType::Channel;
    }
    ChatType::Unknown
}

pub fn infer_signal_target_chat_type(target: &str) -> ChatType {
    if target.is_empty() {
        return ChatType::Unknown;
    }
    if target.starts_with('+') {
        return ChatType::Direct;
    }
    // Signal group ids are long base64 strings; phone numbers are short.
    if target.len() > 20 {
        return ChatType::Group;
    }
    ChatType::Unknown
}

/// Classify a heartbeat target id for the given channel type.
pub fn resolve_heartbeat_chat_type(channel_type: &str, target: &str, is_dm_hint: bool) -> ChatType {
    match channel_type {
        "telegram" => infer_telegram_target_chat_type(target),
        "discord" => infer_discord_target_chat_type(target, is_dm_hint),
        "slack" => infer_slack_target_chat_type(target),
        "whatsapp" => infer_whatsapp_target_chat_type(target),
        "signal" => infer_signal_target_chat_type(target),
        _ => ChatType::Unknown,
    }
}

/// Whether heartbeat delivery to a chat of `chat_type` should be
/// suppressed. Only direct chats ever block; an agent override takes
/// precedence over the default policy.
pub fn should_block_heartbeat_delivery(
    chat_type: ChatType,
    default_policy: HeartbeatPolicy,
    agent_override: Option<HeartbeatPolicy>,
) -> bool {
    if !matches!(chat_type, ChatType::Direct) {
        return false;
    }
    matches!(agent_override.unwrap_or(default_policy), HeartbeatPolicy::Block)
}
