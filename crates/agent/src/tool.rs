//! The tool contract and definition schemas.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// One parameter in a tool's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    /// JSON Schema type: "string", "number", "integer", "boolean",
    /// "array", "object".
    pub param_type: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl ToolParameter {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        ToolParameter {
            name: name.to_string(),
            param_type: param_type.to_string(),
            description: description.to_string(),
            required: true,
            default_value: None,
            enum_values: None,
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str) -> Self {
        ToolParameter {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// A tool's name, description, and typed parameter list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.param_type));
            prop.insert("description".into(), json!(param.description));
            if let Some(default) = &param.default_value {
                prop.insert("default".into(), default.clone());
            }
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), json!(values));
            }
            properties.insert(param.name.clone(), Value::Object(prop));

            if param.required {
                required.push(json!(param.name));
            }
        }

        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".into(), Value::Array(required));
        }
        Value::Object(schema)
    }

    /// Generic form (`input_schema`), also what Anthropic-style
    /// providers accept.
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema(),
        })
    }

    /// OpenAI function-tool form.
    pub fn to_openai_json(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema(),
            },
        })
    }
}

/// A callable tool. Execution errors are not fatal to a chat run: the
/// runtime feeds them back to the model as an error tool result.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, params: Value) -> anyhow::Result<Value>;
}
