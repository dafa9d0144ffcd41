//! `gateway.*` handlers: introspection, health, and shutdown.

use crate::protocol::handler;
use crate::server::{PROTOCOL_VERSION, ServerState};
use serde_json::{Value, json};
use std::sync::Arc;

pub fn register_gateway_handlers(state: Arc<ServerState>) {
    let protocol = state.protocol.clone();

    protocol.register_method(
        "gateway.info",
        handler(move |_params| async move {
            Ok(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "protocol": PROTOCOL_VERSION,
                "engine": "krill",
                "capabilities": [
                    "chat", "tools", "memory", "browser",
                    "channels", "plugins", "cron",
                ],
            }))
        }),
        "Return gateway version and capabilities",
        "gateway",
    );

    protocol.register_method(
        "gateway.ping",
        handler(move |_params| async move {
            Ok(json!({"pong": true, "ts": krill::timestamp_ms()}))
        }),
        "Health check ping",
        "gateway",
    );

    let status_state = state.clone();
    protocol.register_method(
        "gateway.status",
        handler(move |_params| {
            let state = status_state.clone();
            async move {
                Ok(json!({
                    "running": !state.shutdown.is_cancelled(),
                    "uptime_seconds": state.observability.uptime_seconds(),
                    "connection_count": state.connection_count(),
                    "total_requests": state.observability.total_requests(),
                    "total_errors": state.observability.total_errors(),
                }))
            }
        }),
        "Return gateway runtime status",
        "gateway",
    );

    let methods_state = state.clone();
    protocol.register_method(
        "gateway.methods",
        handler(move |_params| {
            let state = methods_state.clone();
            async move {
                let methods = state.protocol.methods();
                let rendered: Vec<Value> = methods
                    .iter()
                    .map(|m| {
                        json!({
                            "name": m.name,
                            "description": m.description,
                            "group": m.group,
                        })
                    })
                    .collect();
                Ok(json!({"count": rendered.len(), "methods": rendered}))
            }
        }),
        "List all registered RPC methods",
        "gateway",
    );

    let metrics_state = state.clone();
    protocol.register_method(
        "gateway.metrics",
        handler(move |_params| {
            let state = metrics_state.clone();
            async move { Ok(state.observability.metrics()) }
        }),
        "Return gateway metrics",
        "gateway",
    );

    let logs_state = state.clone();
    protocol.register_method(
        "gateway.logs",
        handler(move |params: Value| {
            let state = logs_state.clone();
            async move {
                let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize;
                Ok(json!({"logs": state.observability.recent_logs(limit)}))
            }
        }),
        "Query recent gateway logs",
        "gateway",
    );

    let shutdown_state = state.clone();
    protocol.register_method(
        "gateway.shutdown",
        handler(move |_params| {
            let state = shutdown_state.clone();
            async move {
                log::info!("Shutdown requested via gateway.shutdown");
                state.shutdown.cancel();
                Ok(json!({"ok": true}))
            }
        }),
        "Initiate graceful server shutdown",
        "gateway",
    );

    log::info!("Registered gateway handlers");
}
