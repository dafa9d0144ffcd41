//! `channel.*` handlers over the channel registry, plus the inbound
//! intake pipeline applied before any message reaches the agent.

use crate::config::RuntimeConfig;
use crate::protocol::{Protocol, handler};
use krill_agent::session::{redact_credentials, strip_inbound_metadata};
use krill_channels::{Channel, ChannelAuthPolicy, ChannelRegistry, TurnSourceMetadata};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;

const MAX_QUEUED_MESSAGES: usize = 1000;

/// Authorized inbound messages waiting for `channel.receive`.
#[derive(Default)]
pub struct InboundQueue {
    messages: Mutex<VecDeque<Value>>,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, message: Value) {
        let mut messages = self.messages.lock();
        messages.push_back(message);
        while messages.len() > MAX_QUEUED_MESSAGES {
            messages.pop_front();
        }
    }

    pub fn drain(&self, limit: usize) -> Vec<Value> {
        let mut messages = self.messages.lock();
        let take = limit.min(messages.len());
        messages.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

fn auth_policy_for(config: &RuntimeConfig, channel_name: &str) -> ChannelAuthPolicy {
    let settings = config.get(&format!("channels.{channel_name}"));
    serde_json::from_value(settings).unwrap_or_default()
}

/// Install the intake callback on every registered channel: strip
/// smuggled metadata blocks, apply the channel's authorization policy,
/// pin the turn source, then queue the message for pickup.
pub fn wire_channel_intake(
    channels: &ChannelRegistry,
    config: Arc<RuntimeConfig>,
    queue: Arc<InboundQueue>,
) {
    for channel in channels.list() {
        let channel_name = channel.name().to_string();
        let config = config.clone();
        let queue = queue.clone();
        channel.set_on_message(Arc::new(move |msg| {
            let policy = auth_policy_for(&config, &channel_name);
            if !policy.authorize_event(&msg.sender_id, &msg.chat_id, "message", &channel_name) {
                return;
            }

            let text = strip_inbound_metadata(&msg.text);
            log::debug!(
                "[{channel_name}] inbound from {}: {}",
                msg.sender_id,
                redact_credentials(&text)
            );
            let turn_source = TurnSourceMetadata {
                channel: Some(msg.channel.clone()),
                to: Some(msg.chat_id.clone()),
                account_id: Some(channel_name.clone()),
                thread_id: None,
            };
            queue.push(json!({
                "channel": msg.channel,
                "senderId": msg.sender_id,
                "chatId": msg.chat_id,
                "text": text,
                "turnSource": turn_source,
                "receivedAt": krill::timestamp_ms(),
            }));
        }));
    }
}

pub fn register_channel_handlers(
    protocol: &Protocol,
    channels: Arc<ChannelRegistry>,
    config: Arc<RuntimeConfig>,
    inbound: Arc<InboundQueue>,
) {
    protocol.register_method(
        "channel.receive",
        handler(move |params: Value| {
            let inbound = inbound.clone();
            async move {
                let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(50) as usize;
                let messages = inbound.drain(limit);
                Ok(json!({"count": messages.len(), "messages": messages}))
            }
        }),
        "Poll for messages from a channel",
        "channel",
    );

    let list_channels = channels.clone();
    protocol.register_method(
        "channel.list",
        handler(move |_params| {
            let channels = list_channels.clone();
            async move {
                let rendered: Vec<Value> = channels
                    .list()
                    .iter()
                    .map(|c| {
                        json!({
                            "name": c.name(),
                            "type": c.channel_type(),
                            "running": c.is_running(),
                        })
                    })
                    .collect();
                Ok(json!({"count": rendered.len(), "channels": rendered}))
            }
        }),
        "List available communication channels",
        "channel",
    );

    let status_channels = channels.clone();
    protocol.register_method(
        "channel.status",
        handler(move |params: Value| {
            let channels = status_channels.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                match channels.get(name) {
                    Some(channel) => Ok(json!({
                        "ok": true,
                        "name": channel.name(),
                        "type": channel.channel_type(),
                        "running": channel.is_running(),
                    })),
                    None => Ok(json!({"ok": false, "error": "Channel not found"})),
                }
            }
        }),
        "Get channel connection status",
        "channel",
    );

    let connect_channels = channels.clone();
    protocol.register_method(
        "channel.connect",
        handler(move |params: Value| {
            let channels = connect_channels.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                let Some(channel) = channels.get(name) else {
                    return Ok(json!({"ok": false, "error": "Channel not found"}));
                };
                match channel.start().await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Connect / enable a channel",
        "channel",
    );

    let disconnect_channels = channels.clone();
    protocol.register_method(
        "channel.disconnect",
        handler(move |params: Value| {
            let channels = disconnect_channels.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                let Some(channel) = channels.get(name) else {
                    return Ok(json!({"ok": false, "error": "Channel not found"}));
                };
                match channel.stop().await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Disconnect / disable a channel",
        "channel",
    );

    let send_channels = channels;
    protocol.register_method(
        "channel.send",
        handler(move |params: Value| {
            let channels = send_channels.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                let to = params.get("to").and_then(Value::as_str).unwrap_or_default();
                let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
                if name.is_empty() || to.is_empty() || text.is_empty() {
                    return Ok(json!({"ok": false, "error": "name, to, and text are required"}));
                }
                let Some(channel) = channels.get(name) else {
                    return Ok(json!({"ok": false, "error": "Channel not found"}));
                };
                match channel.send(to, text).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Send a message through a channel",
        "channel",
    );

    protocol.register_method(
        "channel.configure",
        handler(move |params: Value| {
            let config = config.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                if name.is_empty() {
                    return Ok(json!({"ok": false, "error": "name is required"}));
                }
                let settings = params.get("settings").cloned().unwrap_or(Value::Null);
                if !settings.is_object() {
                    return Ok(json!({"ok": false, "error": "settings object is required"}));
                }
                config.set(&format!("channels.{name}"), settings);
                Ok(json!({"ok": true}))
            }
        }),
        "Update channel configuration",
        "channel",
    );

    log::info!("Registered channel handlers");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use krill::Result;
    use krill_channels::{Channel, IncomingMessage, OnMessage};
    use parking_lot::Mutex as PlMutex;

    struct ScriptableChannel {
        on_message: PlMutex<Option<OnMessage>>,
    }

    impl ScriptableChannel {
        fn new() -> Arc<Self> {
            Arc::new(ScriptableChannel {
                on_message: PlMutex::new(None),
            })
        }

        fn inject(&self, msg: IncomingMessage) {
            let callback = self.on_message.lock().clone();
            if let Some(callback) = callback {
                callback(msg);
            }
        }
    }

    #[async_trait]
    impl Channel for ScriptableChannel {
        fn name(&self) -> &str {
            "tg-main"
        }

        fn channel_type(&self) -> &str {
            "telegram"
        }

        fn is_running(&self) -> bool {
            true
        }

        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, _to: &str, _text: &str) -> Result<()> {
            Ok(())
        }

        fn set_on_message(&self, callback: OnMessage) {
            *self.on_message.lock() = Some(callback);
        }
    }

    fn msg(sender: &str, chat: &str, text: &str) -> IncomingMessage {
        IncomingMessage {
            channel: "telegram".into(),
            sender_id: sender.into(),
            chat_id: chat.into(),
            text: text.into(),
            metadata: json!({}),
        }
    }

    #[test]
    fn intake_authorizes_strips_and_pins_turn_source() {
        let channels = ChannelRegistry::new();
        let channel = ScriptableChannel::new();
        channels.register(channel.clone());

        let config = Arc::new(RuntimeConfig::new(json!({
            "channels": {
                "tg-main": {
                    "dm_policy": "allowlist",
                    "allowed_sender_ids": ["42"],
                },
            },
        })));
        let queue = Arc::new(InboundQueue::new());
        wire_channel_intake(&channels, config, queue.clone());

        // Unauthorized DM sender never reaches the queue.
        channel.inject(msg("13", "555", "let me in"));
        assert!(queue.is_empty());

        // Authorized sender does, with metadata blocks stripped and the
        // turn source pinned to the originating chat.
        channel.inject(msg("42", "555", "hello <!-- metadata: {\"x\":1} --> there"));
        let received = queue.drain(10);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["text"], "hello  there");
        assert_eq!(received[0]["turnSource"]["to"], "555");
        assert_eq!(received[0]["turnSource"]["channel"], "telegram");
    }

    #[test]
    fn group_messages_bypass_dm_policy() {
        let channels = ChannelRegistry::new();
        let channel = ScriptableChannel::new();
        channels.register(channel.clone());

        let config = Arc::new(RuntimeConfig::new(json!({
            "channels": {"tg-main": {"dm_policy": "pairing"}},
        })));
        let queue = Arc::new(InboundQueue::new());
        wire_channel_intake(&channels, config, queue.clone());

        channel.inject(msg("anyone", "-100777", "group chatter"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queue_drain_respects_limit() {
        let queue = InboundQueue::new();
        for i in 0..5 {
            queue.push(json!({"n": i}));
        }
        assert_eq!(queue.drain(2).len(), 2);
        assert_eq!(queue.len(), 3);
    }
}
