//! The krill gateway daemon.
//!
//! Wires the subsystems together, registers every handler group over
//! the built-in stubs, and serves the WebSocket RPC surface until
//! shutdown (ctrl-c or `gateway.shutdown`).

use clap::Parser;
use krill::secrets::{SecretRef, SecretResolver, SecretsConfig};
use krill_agent::memory::MemoryStore;
use krill_agent::plugin::PluginHost;
use krill_agent::session::{SessionManager, SqliteSessionStore};
use krill_agent::{AgentConfig, AgentRuntime};
use krill_browser::{BrowserConfig, BrowserPool};
use krill_channels::{
    Channel, ChannelRegistry, HeartbeatPolicy, should_block_heartbeat_delivery,
};
use krill_channels::heartbeat::resolve_heartbeat_chat_type;
use krill_cron::CronScheduler;
use krill_gateway::chat::ChatRuns;
use krill_gateway::{
    EventBus, GatewayObservability, GatewayServer, InboundQueue, Protocol, RuntimeConfig,
    Subsystems, ToolPolicy, register_all_handlers, register_builtins,
};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "krill", version, about = "Local agent gateway")]
struct Args {
    /// Listener port (auto-searches upward when busy).
    #[arg(long, env = "KRILL_PORT")]
    port: Option<u16>,

    /// Path to the runtime config JSON (defaults to the config dir).
    #[arg(long, env = "KRILL_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Override the Chrome/Chromium binary path.
    #[arg(long, env = "KRILL_CHROME_PATH")]
    chrome_path: Option<String>,
}

fn default_config() -> serde_json::Value {
    json!({
        "gateway": {
            "port": krill_gateway::DEFAULT_PORT,
            "flood_threshold": 50,
        },
        "browser": {
            "pool_size": 2,
        },
        "sandbox": {
            "enabled": false,
            "network_mode": "bridge",
        },
        "heartbeat": {
            "target": "none",
        },
    })
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        log::error!("Fatal: {}", e.what());
        std::process::exit(1);
    }
}

async fn run(args: Args) -> krill::Result<()> {
    let config_dir = krill::paths::ensure_dir(&krill::paths::config_dir());
    let data_dir = krill::paths::ensure_dir(&krill::paths::data_dir());

    let config_path = args.config.unwrap_or_else(|| config_dir.join("config.json"));
    let config = Arc::new(RuntimeConfig::load_or_default(config_path, default_config())?);
    if let Some(chrome_path) = args.chrome_path {
        config.set("browser.chrome_path", json!(chrome_path));
    }

    let network_mode = config
        .get_string("sandbox.network_mode")
        .unwrap_or_else(|| "bridge".to_string());
    let break_glass =
        config.get_bool("sandbox.dangerously_allow_container_namespace_join", false);
    if !krill_sandbox::validate_sandbox_network_mode(&network_mode, break_glass) {
        return Err(krill::Error::with_detail(
            krill::ErrorKind::InvalidConfig,
            "Blocked sandbox network mode",
            network_mode,
        ));
    }

    // Sessions persist in SQLite under the data dir.
    let store = SqliteSessionStore::open(&data_dir.join("sessions.db"))?;
    let sessions = Arc::new(SessionManager::new(Box::new(store)));

    let provider = Arc::new(krill::ProviderHandle::new());
    let runtime = Arc::new(AgentRuntime::new(
        provider,
        AgentConfig {
            max_tool_iterations: config.get_u64("agent.max_tool_iterations", 10) as usize,
            system_prompt: config.get_string("agent.system_prompt"),
            default_model: config.get_string("agent.model"),
        },
    ));

    let pool = Arc::new(BrowserPool::new(BrowserConfig {
        pool_size: config.get_u64("browser.pool_size", 2) as usize,
        chrome_path: config.get_string("browser.chrome_path"),
        base_debug_port: config.get_u64("browser.base_debug_port", 9222) as u16,
    }));

    let scheduler = CronScheduler::new();
    let channels = Arc::new(ChannelRegistry::new());
    let memory = Arc::new(MemoryStore::new());
    let plugins = Arc::new(PluginHost::new());
    let runs = Arc::new(ChatRuns::new());

    let tool_policy = Arc::new(ToolPolicy::new());
    tool_policy.configure(&json!({
        "tools.profile": config.get("tools.profile"),
        "tools.allow": config.get("tools.allow"),
        "tools.deny": config.get("tools.deny"),
    }));

    let protocol = Arc::new(Protocol::new());
    register_builtins(&protocol);

    let events = Arc::new(EventBus::default());
    let observability = Arc::new(GatewayObservability::new());
    let server = Arc::new(GatewayServer::new(
        protocol,
        events.clone(),
        observability,
        resolve_auth_token(&config).await?,
        config.get_u64("gateway.flood_threshold", 50) as u32,
    ));

    let subsystems = Subsystems {
        runtime,
        sessions,
        scheduler: scheduler.clone(),
        pool: pool.clone(),
        channels: channels.clone(),
        memory,
        plugins,
        runs,
        tool_policy,
        config: config.clone(),
        inbound: Arc::new(InboundQueue::new()),
    };
    register_all_handlers(&server.state(), events, &subsystems);

    let tick_scheduler = scheduler.clone();
    tokio::spawn(async move { tick_scheduler.run().await });

    channels.start_all().await;

    schedule_heartbeat(&scheduler, channels.clone(), config.clone())?;

    // Ctrl-c folds into the same graceful shutdown as gateway.shutdown.
    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, shutting down");
            signal_server.shutdown();
        }
    });

    let port = args
        .port
        .unwrap_or_else(|| config.get_u64("gateway.port", krill_gateway::DEFAULT_PORT as u64) as u16);
    let served = server.run(port).await;

    scheduler.stop();
    channels.stop_all().await;
    pool.close_all().await;

    served
}

/// The gateway auth token: a literal `gateway.auth_token`, or a
/// `gateway.auth_token_ref` secret reference resolved under the
/// `secrets.*` policy (env allowlist, file permissions, exec timeout).
async fn resolve_auth_token(config: &RuntimeConfig) -> krill::Result<Option<String>> {
    if let Some(token) = config.get_string("gateway.auth_token") {
        return Ok(Some(token));
    }

    let ref_value = config.get("gateway.auth_token_ref");
    if ref_value.is_null() {
        return Ok(None);
    }
    let secret_ref: SecretRef = serde_json::from_value(ref_value).map_err(|e| {
        krill::Error::with_detail(
            krill::ErrorKind::InvalidConfig,
            "Invalid gateway.auth_token_ref",
            e.to_string(),
        )
    })?;

    let secrets_config: SecretsConfig =
        serde_json::from_value(config.get("secrets")).unwrap_or_default();
    let resolver = SecretResolver::new(secrets_config);
    resolver.resolve(&secret_ref).await.map(Some)
}

/// Schedule the periodic heartbeat when a target is configured.
/// Delivery to direct chats is suppressed unless the policy says allow;
/// groups and channels always receive it.
fn schedule_heartbeat(
    scheduler: &CronScheduler,
    channels: Arc<ChannelRegistry>,
    config: Arc<RuntimeConfig>,
) -> krill::Result<()> {
    let target = config
        .get_string("heartbeat.target")
        .unwrap_or_else(|| "none".to_string());
    if target == "none" {
        return Ok(());
    }
    let Some((channel_name, chat_id)) = target.split_once(':') else {
        log::warn!("heartbeat.target must look like '<channel>:<chat_id>', got '{target}'");
        return Ok(());
    };
    let channel_name = channel_name.to_string();
    let chat_id = chat_id.to_string();

    let expression = config
        .get_string("heartbeat.cron")
        .unwrap_or_else(|| "*/30 * * * *".to_string());

    let task: krill_cron::CronTask = Arc::new(move || {
        let channels = channels.clone();
        let config = config.clone();
        let channel_name = channel_name.clone();
        let chat_id = chat_id.clone();
        Box::pin(async move {
            let Some(channel) = channels.get(&channel_name) else {
                anyhow::bail!("heartbeat channel '{channel_name}' is not registered");
            };

            let chat_type = resolve_heartbeat_chat_type(channel.channel_type(), &chat_id, false);
            let policy = match config.get_string("heartbeat.policy").as_deref() {
                Some("allow") => HeartbeatPolicy::Allow,
                _ => HeartbeatPolicy::Block,
            };
            if should_block_heartbeat_delivery(chat_type, policy, None) {
                log::debug!("Heartbeat to {chat_id} suppressed ({chat_type:?})");
                return Ok(());
            }

            channel
                .send(&chat_id, "heartbeat")
                .await
                .map_err(|e| anyhow::anyhow!(e.what()))
        })
    });

    scheduler.schedule("heartbeat", &expression, task, false, 0)?;
    Ok(())
}
