//! Real handler groups wiring the protocol to the subsystems.
//!
//! Registration overwrites the built-in stubs for every method a
//! subsystem implements; the rest keep answering
//! `{status:"not_implemented"}`.

mod agent;
mod browser;
mod channel;
mod config;
mod cron;
mod gateway;
mod memory;
mod plugin;
mod provider;
mod session;
mod tool;

pub use channel::{InboundQueue, wire_channel_intake};

use crate::chat::{ChatRuns, register_chat_handlers};
use crate::config::RuntimeConfig;
use crate::events::EventBus;
use crate::server::ServerState;
use crate::tool_policy::ToolPolicy;
use krill_agent::AgentRuntime;
use krill_agent::memory::MemoryStore;
use krill_agent::plugin::PluginHost;
use krill_agent::session::SessionManager;
use krill_browser::BrowserPool;
use krill_channels::ChannelRegistry;
use krill_cron::CronScheduler;
use std::sync::Arc;

/// Everything the handler groups need a hold of.
pub struct Subsystems {
    pub runtime: Arc<AgentRuntime>,
    pub sessions: Arc<SessionManager>,
    pub scheduler: CronScheduler,
    pub pool: Arc<BrowserPool>,
    pub channels: Arc<ChannelRegistry>,
    pub memory: Arc<MemoryStore>,
    pub plugins: Arc<PluginHost>,
    pub runs: Arc<ChatRuns>,
    pub tool_policy: Arc<ToolPolicy>,
    pub config: Arc<RuntimeConfig>,
    pub inbound: Arc<InboundQueue>,
}

/// Register every real handler group.
pub fn register_all_handlers(state: &Arc<ServerState>, events: Arc<EventBus>, subsystems: &Subsystems) {
    let protocol = &state.protocol;

    gateway::register_gateway_handlers(state.clone());
    config::register_config_handlers(protocol, subsystems.config.clone());
    register_chat_handlers(
        protocol,
        events,
        subsystems.runtime.clone(),
        subsystems.runs.clone(),
    );
    agent::register_agent_handlers(
        protocol,
        subsystems.runtime.clone(),
        subsystems.sessions.clone(),
        subsystems.config.clone(),
    );
    session::register_session_handlers(protocol, subsystems.sessions.clone());
    cron::register_cron_handlers(protocol, subsystems.scheduler.clone());
    browser::register_browser_handlers(protocol, subsystems.pool.clone());
    tool::register_tool_handlers(
        protocol,
        subsystems.runtime.clone(),
        subsystems.tool_policy.clone(),
        subsystems.config.clone(),
    );
    channel::register_channel_handlers(
        protocol,
        subsystems.channels.clone(),
        subsystems.config.clone(),
        subsystems.inbound.clone(),
    );
    channel::wire_channel_intake(
        &subsystems.channels,
        subsystems.config.clone(),
        subsystems.inbound.clone(),
    );
    provider::register_provider_handlers(protocol, subsystems.runtime.clone());
    memory::register_memory_handlers(protocol, subsystems.memory.clone());
    plugin::register_plugin_handlers(protocol, subsystems.plugins.clone());
}
