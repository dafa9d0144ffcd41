//! Tools catalog: grouped view of the registry plus the default
//! profiles, for UI consumption.

use krill_agent::ToolRegistry;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ToolCatalogEntry {
    pub name: String,
    pub description: String,
    pub group: String,
    pub hidden: bool,
    pub parameters_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCatalogGroup {
    pub name: String,
    pub description: String,
    pub tools: Vec<ToolCatalogEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCatalogProfile {
    pub name: String,
    pub included_groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolsCatalog {
    pub groups: Vec<ToolCatalogGroup>,
    pub profiles: Vec<ToolCatalogProfile>,
    pub total_tools: usize,
}

fn profile(name: &str, groups: &[&str]) -> ToolCatalogProfile {
    ToolCatalogProfile {
        name: name.to_string(),
        included_groups: groups.iter().map(|g| g.to_string()).collect(),
    }
}

/// Build the catalog from the live registry. Registered tools land in a
/// single `core` group; disabled tools are marked hidden.
pub fn build_tools_catalog(registry: &ToolRegistry) -> ToolsCatalog {
    let entries: Vec<ToolCatalogEntry> = registry
        .definitions()
        .into_iter()
        .map(|def| ToolCatalogEntry {
            hidden: !registry.is_enabled(&def.name),
            parameters_schema: def.to_json()["input_schema"].clone(),
            name: def.name,
            description: def.description,
            group: "core".to_string(),
        })
        .collect();

    let total_tools = entries.len();
    let groups = vec![ToolCatalogGroup {
        name: "core".to_string(),
        description: "Tools registered with the agent runtime".to_string(),
        tools: entries,
    }];

    let profiles = vec![
        profile("Minimal", &["core"]),
        profile("Coding", &["core", "filesystem", "shell", "browser"]),
        profile("Messaging", &["core", "channels", "delivery"]),
        profile(
            "Full",
            &[
                "core",
                "filesystem",
                "shell",
                "browser",
                "channels",
                "delivery",
                "memory",
                "cron",
                "sessions",
                "automation",
            ],
        ),
    ];

    ToolsCatalog {
        groups,
        profiles,
        total_tools,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use krill_agent::{Tool, ToolDefinition};
    use std::sync::Arc;

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "noop".into(),
                description: "Does nothing".into(),
                parameters: vec![],
            }
        }

        async fn execute(&self, _params: Value) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn catalog_reflects_registry() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(NoopTool));

        let catalog = build_tools_catalog(&registry);
        assert_eq!(catalog.total_tools, 1);
        assert_eq!(catalog.groups[0].tools[0].name, "noop");
        assert_eq!(catalog.profiles.len(), 4);
        assert_eq!(catalog.profiles[3].name, "Full");
    }

    #[test]
    fn empty_registry_yields_empty_core_group() {
        let catalog = build_tools_catalog(&ToolRegistry::new());
        assert_eq!(catalog.total_tools, 0);
        assert!(catalog.groups[0].tools.is_empty());
    }
}
