//! `plugin.*` handlers over the plugin host. Installation (dynamic
//! loading) stays behind the stub.

use crate::protocol::{Protocol, handler};
use krill_agent::plugin::PluginHost;
use serde_json::{Value, json};
use std::sync::Arc;

pub fn register_plugin_handlers(protocol: &Protocol, plugins: Arc<PluginHost>) {
    let list_plugins = plugins.clone();
    protocol.register_method(
        "plugin.list",
        handler(move |_params| {
            let plugins = list_plugins.clone();
            async move {
                let list = plugins.list();
                Ok(json!({"count": list.len(), "plugins": serde_json::to_value(list)?}))
            }
        }),
        "List installed plugins",
        "plugin",
    );

    for (method, enabled, description) in [
        ("plugin.enable", true, "Enable an installed plugin"),
        ("plugin.disable", false, "Disable a plugin"),
    ] {
        let toggle_plugins = plugins.clone();
        protocol.register_method(
            method,
            handler(move |params: Value| {
                let plugins = toggle_plugins.clone();
                async move {
                    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                    if name.is_empty() {
                        return Ok(json!({"ok": false, "error": "name is required"}));
                    }
                    match plugins.set_enabled(name, enabled) {
                        Ok(()) => Ok(json!({"ok": true})),
                        Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                    }
                }
            }),
            description,
            "plugin",
        );
    }

    let uninstall_plugins = plugins.clone();
    protocol.register_method(
        "plugin.uninstall",
        handler(move |params: Value| {
            let plugins = uninstall_plugins.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                if name.is_empty() {
                    return Ok(json!({"ok": false, "error": "name is required"}));
                }
                match plugins.unregister(name) {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Uninstall a plugin",
        "plugin",
    );

    let status_plugins = plugins.clone();
    protocol.register_method(
        "plugin.status",
        handler(move |params: Value| {
            let plugins = status_plugins.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                match plugins.status(name) {
                    Ok(status) => Ok(json!({"ok": true, "plugin": serde_json::to_value(status)?})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Get plugin runtime status",
        "plugin",
    );

    protocol.register_method(
        "plugin.call",
        handler(move |params: Value| {
            let plugins = plugins.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                let function = params.get("function").and_then(Value::as_str).unwrap_or_default();
                if name.is_empty() || function.is_empty() {
                    return Ok(json!({"ok": false, "error": "name and function are required"}));
                }
                let args = params.get("params").cloned().unwrap_or_else(|| json!({}));
                match plugins.call(name, function, args).await {
                    Ok(result) => Ok(json!({"ok": true, "result": result})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Call an exported plugin function",
        "plugin",
    );

    log::info!("Registered plugin handlers");
}
