//! Name-keyed tool registry.

use crate::tool::{Tool, ToolDefinition};
use krill::{Error, ErrorKind, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Holds the tools the model may call. Registration replaces by name;
/// disabled tools stay registered but refuse execution and drop out of
/// the definitions handed to providers.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    disabled: RwLock<HashSet<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            log::warn!("Replacing existing tool: {name}");
        } else {
            log::info!("Registered tool: {name}");
        }
        tools.insert(name, tool);
    }

    pub fn remove(&self, name: &str) -> bool {
        let removed = self.tools.write().remove(name).is_some();
        if removed {
            self.disabled.write().remove(name);
            log::info!("Removed tool: {name}");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        if !self.contains(name) {
            return Err(Error::with_detail(ErrorKind::NotFound, "Tool not found", name.to_string()));
        }
        let mut disabled = self.disabled.write();
        if enabled {
            disabled.remove(name);
        } else {
            disabled.insert(name.to_string());
        }
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        !self.disabled.read().contains(name)
    }

    /// Number of registered tools, enabled or not.
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Definitions of every enabled tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let disabled = self.disabled.read();
        self.tools
            .read()
            .values()
            .map(|t| t.definition())
            .filter(|d| !disabled.contains(&d.name))
            .collect()
    }

    /// Enabled tool definitions in the generic (`input_schema`) form.
    pub fn to_json(&self) -> Vec<Value> {
        self.definitions().iter().map(|d| d.to_json()).collect()
    }

    /// Enabled tool definitions in the OpenAI function form.
    pub fn to_openai_json(&self) -> Vec<Value> {
        self.definitions().iter().map(|d| d.to_openai_json()).collect()
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, params: Value) -> Result<Value> {
        let tool = self.get(name).ok_or_else(|| {
            Error::with_detail(ErrorKind::NotFound, "Tool not found", name.to_string())
        })?;

        if !self.is_enabled(name) {
            return Err(Error::with_detail(
                ErrorKind::Forbidden,
                "Tool is disabled",
                name.to_string(),
            ));
        }

        log::debug!("Executing tool: {name}");
        match tool.execute(params).await {
            Ok(result) => {
                log::debug!("Tool {name} executed successfully");
                Ok(result)
            }
            Err(e) => {
                log::warn!("Tool {name} execution failed: {e}");
                Err(Error::with_detail(
                    ErrorKind::Internal,
                    "Tool execution failed",
                    e.to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolParameter;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "Echo the input back".into(),
                parameters: vec![ToolParameter::required("text", "string", "Text to echo")],
            }
        }

        async fn execute(&self, params: Value) -> anyhow::Result<Value> {
            Ok(json!({"echo": params["text"]}))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "broken".into(),
                description: "Always fails".into(),
                parameters: vec![],
            }
        }

        async fn execute(&self, _params: Value) -> anyhow::Result<Value> {
            anyhow::bail!("tool blew up")
        }
    }

    #[tokio::test]
    async fn register_and_execute() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.contains("echo"));

        let result = registry.execute("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(result, json!({"echo": "hi"}));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.execute("ghost", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn tool_errors_surface_with_detail() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        let err = registry.execute("broken", json!({})).await.unwrap_err();
        assert!(err.what().contains("tool blew up"));
    }

    #[tokio::test]
    async fn disabled_tool_refuses_execution_and_hides_from_definitions() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.set_enabled("echo", false).unwrap();

        let err = registry.execute("echo", json!({"text": "x"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(registry.to_json().is_empty());

        registry.set_enabled("echo", true).unwrap();
        assert_eq!(registry.to_json().len(), 1);
    }

    #[test]
    fn register_replaces_by_name() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
    }
}
