//! Core types and contracts shared across the krill agent gateway.
//!
//! This crate defines the pieces every subsystem speaks in terms of:
//!
//! - A single tagged [`Error`] carried by every fallible operation
//! - The chat/completion data model ([`chat`])
//! - The [`Provider`] trait implemented by LLM backends, plus a
//!   swap-capable [`ProviderHandle`] the runtime reads
//! - Secret resolution, filesystem path conventions, and port probing

pub mod chat;
pub mod error;
pub mod model;
pub mod paths;
pub mod ports;
pub mod provider;
pub mod secrets;

pub use chat::{
    CompletionChunk, CompletionRequest, CompletionResponse, ContentBlock, Message, Role,
    StreamCallback,
};
pub use error::{Error, ErrorKind, Result};
pub use provider::{Provider, ProviderHandle};

/// Current time as milliseconds since the Unix epoch.
pub fn timestamp_ms() -> i64 {
    let now = time::OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000) as i64
}
