//! Agent runtime for the krill gateway.
//!
//! The [`AgentRuntime`] drives provider calls and the tool loop; the
//! [`ToolRegistry`] holds the tools the model may call; the session
//! module persists session metadata; [`memory`] and [`plugin`] back the
//! corresponding RPC handler groups.

pub mod memory;
pub mod plugin;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod tool;

pub use registry::ToolRegistry;
pub use runtime::{AgentConfig, AgentRuntime};
pub use tool::{Tool, ToolDefinition, ToolParameter};
