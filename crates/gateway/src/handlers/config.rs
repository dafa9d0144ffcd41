//! `config.*` handlers over the runtime configuration tree.

use crate::config::RuntimeConfig;
use crate::protocol::{Protocol, handler};
use serde_json::{Value, json};
use std::sync::Arc;

pub fn register_config_handlers(protocol: &Protocol, config: Arc<RuntimeConfig>) {
    let get_config = config.clone();
    protocol.register_method(
        "config.get",
        handler(move |params: Value| {
            let config = get_config.clone();
            async move {
                let path = params.get("path").and_then(Value::as_str).unwrap_or_default();
                if path.is_empty() {
                    return Ok(json!({"ok": false, "error": "path is required"}));
                }
                Ok(json!({"value": config.get(path), "hash": config.hash()}))
            }
        }),
        "Get configuration value by key",
        "config",
    );

    let set_config = config.clone();
    protocol.register_method(
        "config.set",
        handler(move |params: Value| {
            let config = set_config.clone();
            async move {
                let path = params.get("path").and_then(Value::as_str).unwrap_or_default();
                if path.is_empty() {
                    return Ok(json!({"ok": false, "error": "path is required"}));
                }
                let value = params.get("value").cloned().unwrap_or(Value::Null);
                config.set(path, value);
                Ok(json!({"ok": true}))
            }
        }),
        "Set configuration value",
        "config",
    );

    let patch_config = config.clone();
    protocol.register_method(
        "config.patch",
        handler(move |params: Value| {
            let config = patch_config.clone();
            async move {
                let base_hash = params
                    .get("baseHash")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let patches: Vec<(String, Value)> = params
                    .get("patches")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .map(|p| {
                                (
                                    p.get("path")
                                        .and_then(Value::as_str)
                                        .unwrap_or_default()
                                        .to_string(),
                                    p.get("value").cloned().unwrap_or(Value::Null),
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                if config.patch(&patches, &base_hash) {
                    Ok(json!({"ok": true}))
                } else {
                    Ok(json!({
                        "ok": false,
                        "error": "Config has been modified since baseHash was computed",
                    }))
                }
            }
        }),
        "Apply config patches with optimistic concurrency",
        "config",
    );

    let list_config = config.clone();
    protocol.register_method(
        "config.list",
        handler(move |_params| {
            let config = list_config.clone();
            async move { Ok(json!({"keys": config.list_keys()})) }
        }),
        "List all configuration keys",
        "config",
    );

    let reset_config = config.clone();
    protocol.register_method(
        "config.reset",
        handler(move |_params| {
            let config = reset_config.clone();
            async move {
                config.reset();
                Ok(json!({"ok": true}))
            }
        }),
        "Reset configuration to defaults",
        "config",
    );

    let export_config = config.clone();
    protocol.register_method(
        "config.export",
        handler(move |_params| {
            let config = export_config.clone();
            async move { Ok(config.to_json()) }
        }),
        "Export full configuration as JSON",
        "config",
    );

    let import_config = config;
    protocol.register_method(
        "config.import",
        handler(move |params: Value| {
            let config = import_config.clone();
            async move {
                let Some(incoming) = params.get("config").and_then(Value::as_object) else {
                    return Ok(json!({"ok": false, "error": "config must be a JSON object"}));
                };
                config.import(incoming);
                Ok(json!({"ok": true}))
            }
        }),
        "Import configuration from JSON",
        "config",
    );

    log::info!("Registered config handlers");
}
