//! The channel contract and registry.

use async_trait::async_trait;
use krill::{Error, ErrorKind, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A message received from a channel, before authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Callback invoked for each authorized inbound message.
pub type OnMessage = Arc<dyn Fn(IncomingMessage) + Send + Sync>;

/// A bot surface the gateway can send and receive through.
///
/// Implementations wrap a vendor SDK; the gateway only depends on this
/// contract.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable channel name, e.g. `"telegram-main"`.
    fn name(&self) -> &str;

    /// Channel kind, e.g. `"telegram"`, `"discord"`, `"slack"`.
    fn channel_type(&self) -> &str;

    fn is_running(&self) -> bool;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Deliver `text` to `to` (a chat/user/channel id).
    async fn send(&self, to: &str, text: &str) -> Result<()>;

    /// Install the inbound message callback.
    fn set_on_message(&self, callback: OnMessage);
}

/// Name-keyed channel registry. Start/stop failures are isolated per
/// channel so one broken integration cannot take the rest down.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        let mut channels = self.channels.write();
        if channels.contains_key(&name) {
            log::warn!("Replacing existing channel: {name}");
        } else {
            log::info!("Registered channel: {name}");
        }
        channels.insert(name, channel);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        match self.channels.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::with_detail(
                ErrorKind::NotFound,
                "Channel not found",
                name.to_string(),
            )),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    pub fn list(&self) -> Vec<Arc<dyn Channel>> {
        self.channels.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Start every registered channel, logging failures without aborting.
    pub async fn start_all(&self) {
        for channel in self.list() {
            if let Err(e) = channel.start().await {
                log::error!("Failed to start channel {}: {}", channel.name(), e.what());
            }
        }
    }

    /// Stop every registered channel, logging failures without aborting.
    pub async fn stop_all(&self) {
        for channel in self.list() {
            if let Err(e) = channel.stop().await {
                log::error!("Failed to stop channel {}: {}", channel.name(), e.what());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeChannel {
        name: String,
        running: AtomicBool,
        fail_start: bool,
    }

    impl FakeChannel {
        fn new(name: &str, fail_start: bool) -> Arc<Self> {
            Arc::new(FakeChannel {
                name: name.to_string(),
                running: AtomicBool::new(false),
                fail_start,
            })
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn name(&self) -> &str {
            &self.name
        }

        fn channel_type(&self) -> &str {
            "fake"
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        async fn start(&self) -> Result<()> {
            if self.fail_start {
                return Err(Error::new(ErrorKind::Channel, "start failed"));
            }
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, _to: &str, _text: &str) -> Result<()> {
            Ok(())
        }

        fn set_on_message(&self, _callback: OnMessage) {}
    }

    #[tokio::test]
    async fn start_all_isolates_failures() {
        let registry = ChannelRegistry::new();
        registry.register(FakeChannel::new("good", false));
        registry.register(FakeChannel::new("broken", true));

        registry.start_all().await;

        assert!(registry.get("good").unwrap().is_running());
        assert!(!registry.get("broken").unwrap().is_running());
    }

    #[test]
    fn register_replaces_by_name() {
        let registry = ChannelRegistry::new();
        registry.register(FakeChannel::new("dup", false));
        registry.register(FakeChannel::new("dup", true));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let registry = ChannelRegistry::new();
        assert_eq!(registry.remove("ghost").unwrap_err().kind(), ErrorKind::NotFound);
    }
}
