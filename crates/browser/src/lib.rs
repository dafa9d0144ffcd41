//! Headless browser automation for the krill agent gateway.
//!
//! [`cdp`] speaks the Chrome DevTools Protocol over a WebSocket;
//! [`pool`] forks and recycles headless Chrome processes; [`action`]
//! offers page-level helpers (navigate, evaluate, screenshot, ...) on
//! top of a connected client.

pub mod action;
pub mod cdp;
pub mod pool;

pub use cdp::{CdpClient, EventHandler};
pub use pool::{BrowserConfig, BrowserInstance, BrowserPool};
