//! Channel abstractions and messaging guards.
//!
//! A [`Channel`] is a bot surface (Telegram, Discord, Slack, WhatsApp,
//! SMS); the concrete SDK integrations live outside this workspace. This
//! crate holds the registry, the authorization policy applied before a
//! message reaches the agent, the typing-indicator circuit breaker, the
//! unauthorized-flood guard, heartbeat delivery gating, and turn-source
//! reply pinning.

pub mod auth;
pub mod channel;
pub mod flood;
pub mod heartbeat;
pub mod routing;
pub mod turn_source;
pub mod typing;

pub use auth::ChannelAuthPolicy;
pub use channel::{Channel, ChannelRegistry, IncomingMessage, OnMessage};
pub use flood::UnauthorizedFloodGuard;
pub use heartbeat::{ChatType, HeartbeatPolicy, should_block_heartbeat_delivery};
pub use turn_source::TurnSourceMetadata;
pub use typing::TypingStartGuard;
