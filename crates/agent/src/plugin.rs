//! Plugin contract and host registry.
//!
//! Dynamic-library loading lives outside this workspace; the gateway
//! only manages registered [`Plugin`] implementations.

use async_trait::async_trait;
use krill::{Error, ErrorKind, Result};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// A loaded plugin exposing named callable functions.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    async fn call(&self, function: &str, params: Value) -> anyhow::Result<Value>;
}

struct PluginEntry {
    plugin: Arc<dyn Plugin>,
    enabled: bool,
}

/// Name-keyed plugin registry with enable/disable gating.
#[derive(Default)]
pub struct PluginHost {
    plugins: RwLock<HashMap<String, PluginEntry>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    #[serde(flatten)]
    pub info: PluginInfo,
    pub enabled: bool,
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        let name = plugin.info().name;
        let mut plugins = self.plugins.write();
        if plugins.contains_key(&name) {
            log::warn!("Replacing existing plugin: {name}");
        } else {
            log::info!("Registered plugin: {name}");
        }
        plugins.insert(name, PluginEntry { plugin, enabled: true });
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        match self.plugins.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(not_found(name)),
        }
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        match self.plugins.write().get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                Ok(())
            }
            None => Err(not_found(name)),
        }
    }

    pub fn status(&self, name: &str) -> Result<PluginStatus> {
        let plugins = self.plugins.read();
        plugins
            .get(name)
            .map(|entry| PluginStatus {
                info: entry.plugin.info(),
                enabled: entry.enabled,
            })
            .ok_or_else(|| not_found(name))
    }

    pub fn list(&self) -> Vec<PluginStatus> {
        let mut statuses: Vec<PluginStatus> = self
            .plugins
            .read()
            .values()
            .map(|entry| PluginStatus {
                info: entry.plugin.info(),
                enabled: entry.enabled,
            })
            .collect();
        statuses.sort_by(|a, b| a.info.name.cmp(&b.info.name));
        statuses
    }

    pub async fn call(&self, name: &str, function: &str, params: Value) -> Result<Value> {
        let plugin = {
            let plugins = self.plugins.read();
            let entry = plugins.get(name).ok_or_else(|| not_found(name))?;
            if !entry.enabled {
                return Err(Error::with_detail(
                    ErrorKind::Forbidden,
                    "Plugin is disabled",
                    name.to_string(),
                ));
            }
            entry.plugin.clone()
        };

        plugin.call(function, params).await.map_err(|e| {
            Error::with_detail(ErrorKind::Plugin, "Plugin call failed", format!("{name}.{function}: {e}"))
        })
    }
}

fn not_found(name: &str) -> Error {
    Error::with_detail(ErrorKind::NotFound, "Plugin not found", name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct GreeterPlugin;

    #[async_trait]
    impl Plugin for GreeterPlugin {
        fn info(&self) -> PluginInfo {
            PluginInfo {
                name: "greeter".into(),
                version: "1.0.0".into(),
                description: "Says hello".into(),
            }
        }

        async fn call(&self, function: &str, params: Value) -> anyhow::Result<Value> {
            match function {
                "greet" => Ok(json!(format!("hello {}", params["name"].as_str().unwrap_or("?")))),
                other => anyhow::bail!("unknown function {other}"),
            }
        }
    }

    #[tokio::test]
    async fn call_routes_to_plugin_function() {
        let host = PluginHost::new();
        host.register(Arc::new(GreeterPlugin));

        let out = host.call("greeter", "greet", json!({"name": "krill"})).await.unwrap();
        assert_eq!(out, json!("hello krill"));

        let err = host.call("greeter", "nope", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Plugin);
    }

    #[tokio::test]
    async fn disabled_plugin_refuses_calls() {
        let host = PluginHost::new();
        host.register(Arc::new(GreeterPlugin));
        host.set_enabled("greeter", false).unwrap();

        let err = host.call("greeter", "greet", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(!host.status("greeter").unwrap().enabled);
    }

    #[test]
    fn unknown_plugin_is_not_found() {
        let host = PluginHost::new();
        assert_eq!(host.status("ghost").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(host.unregister("ghost").unwrap_err().kind(), ErrorKind::NotFound);
    }
}
