//! Chat and completion data model shared by providers, the agent runtime,
//! and the gateway's streaming engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One block of message content.
///
/// Assistant messages carry `text`, `thinking`, and `tool_use` blocks;
/// tool results are packed into `tool_result` blocks on a user-role
/// message, Anthropic style.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        tool_name: String,
        content: Value,
        /// Plain-text dump of `content`, for providers that only accept text.
        text: String,
    },
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
            created_at: crate::timestamp_ms(),
        }
    }

    /// Concatenated text of every `text` block.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }

    /// All `tool_use` blocks in this message.
    pub fn tool_uses(&self) -> Vec<&ContentBlock> {
        self.content
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
            .collect()
    }
}

/// A completion request handed to a [`Provider`](crate::Provider).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Tool definitions in the provider's schema. Left empty by callers,
    /// the runtime injects registry definitions before the first call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

/// The provider's reply to a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub message: Message,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub stop_reason: String,
}

/// One streamed fragment of an in-progress completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionChunk {
    Text { text: String },
    Thinking { text: String },
    ToolUse { tool_name: String, tool_input: Value },
}

/// Callback invoked for every streamed chunk. Providers may call this
/// from their own threads; implementations must be thread-safe and must
/// not block.
pub type StreamCallback = Arc<dyn Fn(CompletionChunk) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_block_round_trips_with_type_tag() {
        let block = ContentBlock::ToolUse {
            id: "tu_1".into(),
            name: "shell".into(),
            input: json!({"command": "ls"}),
        };
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "tool_use");
        assert_eq!(v["name"], "shell");
        let back: ContentBlock = serde_json::from_value(v).unwrap();
        assert!(matches!(back, ContentBlock::ToolUse { .. }));
    }

    #[test]
    fn message_text_concatenates_text_blocks_only() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::Text { text: "Hello ".into() },
                ContentBlock::Thinking { text: "hmm".into() },
                ContentBlock::Text { text: "world".into() },
            ],
            created_at: 0,
        };
        assert_eq!(msg.text(), "Hello world");
        assert!(msg.tool_uses().is_empty());
    }
}
