//! The krill gateway: a WebSocket RPC surface over the agent runtime,
//! browser pool, cron scheduler, sessions, channels, memory, and
//! plugins.
//!
//! Clients send request frames and receive correlated responses;
//! progress (chat deltas, tool calls) flows back as broadcast events on
//! the same connection.

pub mod builtins;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod events;
pub mod frames;
pub mod handlers;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod tool_policy;

pub use builtins::register_builtins;
pub use chat::ChatRuns;
pub use config::RuntimeConfig;
pub use events::EventBus;
pub use frames::{ErrorPayload, Frame};
pub use handlers::{InboundQueue, Subsystems, register_all_handlers, wire_channel_intake};
pub use observability::GatewayObservability;
pub use protocol::{MethodHandler, MethodInfo, Protocol, handler};
pub use server::{DEFAULT_PORT, GatewayServer, ServerState};
pub use tool_policy::{ToolPolicy, ToolProfile};
