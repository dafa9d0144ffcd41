//! Dispatch-level tests against the fully wired handler surface: real
//! handlers overwrite the stubs, and each group talks to its subsystem.

use krill::ProviderHandle;
use krill_agent::memory::MemoryStore;
use krill_agent::plugin::PluginHost;
use krill_agent::session::{InMemorySessionStore, SessionManager};
use krill_agent::{AgentConfig, AgentRuntime};
use krill_browser::{BrowserConfig, BrowserPool};
use krill_channels::ChannelRegistry;
use krill_cron::CronScheduler;
use krill_gateway::chat::ChatRuns;
use krill_gateway::{
    EventBus, GatewayObservability, GatewayServer, InboundQueue, Protocol, RuntimeConfig,
    Subsystems, ToolPolicy, register_all_handlers, register_builtins,
};
use serde_json::{Value, json};
use std::sync::Arc;

struct Wired {
    server: Arc<GatewayServer>,
}

impl Wired {
    async fn dispatch(&self, method: &str, params: Value) -> Value {
        self.server
            .state()
            .protocol
            .dispatch(method, params)
            .await
            .unwrap_or_else(|e| json!({"dispatchError": e.what()}))
    }
}

fn wire() -> Wired {
    let protocol = Arc::new(Protocol::new());
    register_builtins(&protocol);

    let events = Arc::new(EventBus::default());
    let config = Arc::new(RuntimeConfig::new(json!({
        "gateway": {"port": 18789},
    })));

    let server = Arc::new(GatewayServer::new(
        protocol,
        events.clone(),
        Arc::new(GatewayObservability::new()),
        None,
        50,
    ));

    let subsystems = Subsystems {
        runtime: Arc::new(AgentRuntime::new(
            Arc::new(ProviderHandle::new()),
            AgentConfig::default(),
        )),
        sessions: Arc::new(SessionManager::new(Box::new(InMemorySessionStore::new()))),
        scheduler: CronScheduler::new(),
        pool: Arc::new(BrowserPool::new(BrowserConfig::default())),
        channels: Arc::new(ChannelRegistry::new()),
        memory: Arc::new(MemoryStore::new()),
        plugins: Arc::new(PluginHost::new()),
        runs: Arc::new(ChatRuns::new()),
        tool_policy: Arc::new(ToolPolicy::new()),
        config,
        inbound: Arc::new(InboundQueue::new()),
    };
    register_all_handlers(&server.state(), events, &subsystems);

    Wired { server }
}

#[tokio::test]
async fn real_handlers_overwrite_stubs() {
    let w = wire();

    let pong = w.dispatch("gateway.ping", json!({})).await;
    assert_eq!(pong["pong"], true);
    assert!(pong.get("status").is_none());

    let info = w.dispatch("gateway.info", json!({})).await;
    assert_eq!(info["engine"], "krill");
}

#[tokio::test]
async fn gateway_methods_lists_the_full_surface() {
    let w = wire();
    let methods = w.dispatch("gateway.methods", json!({})).await;
    let count = methods["count"].as_u64().unwrap();
    assert!(count > 100, "expected the full surface, got {count}");

    // Unimplemented platform integrations keep answering as stubs.
    let stub = w.dispatch("channel.telegram.webhook", json!({})).await;
    assert_eq!(stub["status"], "not_implemented");
}

#[tokio::test]
async fn session_lifecycle_over_rpc() {
    let w = wire();

    let created = w
        .dispatch("session.create", json!({"userId": "alice", "channel": "telegram"}))
        .await;
    assert_eq!(created["ok"], true);
    let id = created["session"]["id"].as_str().unwrap().to_string();

    let fetched = w.dispatch("session.get", json!({"id": id})).await;
    assert_eq!(fetched["session"]["user_id"], "alice");

    w.dispatch("session.context.set", json!({"id": id, "key": "k", "value": 7}))
        .await;
    let context = w.dispatch("session.context.get", json!({"id": id, "key": "k"})).await;
    assert_eq!(context["value"], 7);

    let beat = w.dispatch("session.heartbeat", json!({"id": id})).await;
    assert_eq!(beat["ok"], true);

    let destroyed = w.dispatch("session.destroy", json!({"id": id})).await;
    assert_eq!(destroyed["ok"], true);
    let gone = w.dispatch("session.get", json!({"id": id})).await;
    assert_eq!(gone["ok"], false);
}

#[tokio::test]
async fn cron_lifecycle_over_rpc() {
    let w = wire();

    let created = w
        .dispatch(
            "cron.create",
            json!({"name": "wake", "expression": "* * * * *", "sessionKey": "daily", "agentId": "agent"}),
        )
        .await;
    assert_eq!(created["ok"], true);
    assert_eq!(created["sessionKey"], "agent:daily");

    let listed = w.dispatch("cron.list", json!({})).await;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["tasks"][0]["name"], "wake");

    let bad = w.dispatch("cron.create", json!({"name": "x", "expression": "*/0 * * * *"})).await;
    assert_eq!(bad["ok"], false);

    let triggered = w.dispatch("cron.trigger", json!({"name": "wake"})).await;
    assert_eq!(triggered["ok"], true);

    let disabled = w.dispatch("cron.disable", json!({"name": "wake"})).await;
    assert_eq!(disabled["ok"], true);

    let deleted = w.dispatch("cron.delete", json!({"name": "wake"})).await;
    assert_eq!(deleted["ok"], true);
    let status = w.dispatch("cron.status", json!({})).await;
    assert_eq!(status["taskCount"], 0);
}

#[tokio::test]
async fn config_optimistic_patch_over_rpc() {
    let w = wire();

    let initial = w.dispatch("config.get", json!({"path": "gateway.port"})).await;
    assert_eq!(initial["value"], 18789);
    let h0 = initial["hash"].as_str().unwrap().to_string();

    let patched = w
        .dispatch(
            "config.patch",
            json!({"baseHash": h0, "patches": [{"path": "gateway.port", "value": 8000}]}),
        )
        .await;
    assert_eq!(patched["ok"], true);

    // Replaying against the stale hash mutates nothing.
    let stale = w
        .dispatch(
            "config.patch",
            json!({"baseHash": h0, "patches": [{"path": "gateway.port", "value": 9000}]}),
        )
        .await;
    assert_eq!(stale["ok"], false);

    let current = w.dispatch("config.get", json!({"path": "gateway.port"})).await;
    assert_eq!(current["value"], 8000);
}

#[tokio::test]
async fn memory_store_and_recall_over_rpc() {
    let w = wire();

    let stored = w
        .dispatch("memory.store", json!({"scope": "user", "text": "prefers rust over c++"}))
        .await;
    assert_eq!(stored["ok"], true);

    let recalled = w
        .dispatch("memory.recall", json!({"query": "rust", "scope": "user"}))
        .await;
    assert_eq!(recalled["memories"][0]["text"], "prefers rust over c++");

    let stats = w.dispatch("memory.stats", json!({})).await;
    assert_eq!(stats["total_entries"], 1);
}

#[tokio::test]
async fn provider_status_without_provider() {
    let w = wire();
    let status = w.dispatch("provider.status", json!({})).await;
    assert_eq!(status["configured"], false);

    // With no provider, chat.send still acks; the failure arrives as an
    // error event on the run.
    let ack = w.dispatch("chat.send", json!({"message": "hi"})).await;
    assert!(ack["runId"].as_str().is_some());
}

#[tokio::test]
async fn agent_model_and_thinking_settings() {
    let w = wire();

    let set = w.dispatch("agent.model.set", json!({"model": "anthropic/claude-opus-4"})).await;
    assert_eq!(set["provider"], "anthropic");
    let got = w.dispatch("agent.model.get", json!({})).await;
    assert_eq!(got["model"], "claude-opus-4");

    let bad = w.dispatch("agent.thinking.set", json!({"thinking": "galaxy"})).await;
    assert_eq!(bad["ok"], false);
    w.dispatch("agent.thinking.set", json!({"thinking": "extended"})).await;
    let mode = w.dispatch("agent.thinking.get", json!({})).await;
    assert_eq!(mode["thinking"], "extended");
}
