//! The agent runtime: provider calls and the tool loop.

use crate::registry::ToolRegistry;
use krill::chat::{CompletionRequest, CompletionResponse, ContentBlock, Message, Role, StreamCallback};
use krill::{Error, ErrorKind, Provider, ProviderHandle, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runtime configuration from the `agent.*` config knobs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_tool_iterations: usize,
    pub system_prompt: Option<String>,
    pub default_model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            max_tool_iterations: 10,
            system_prompt: None,
            default_model: None,
        }
    }
}

/// Owns the tool registry, reads the shared provider handle, and runs
/// completions with or without the tool loop.
pub struct AgentRuntime {
    provider: Arc<ProviderHandle>,
    tools: ToolRegistry,
    config: parking_lot::RwLock<AgentConfig>,
}

impl AgentRuntime {
    pub fn new(provider: Arc<ProviderHandle>, config: AgentConfig) -> Self {
        log::info!("Agent runtime initialized");
        AgentRuntime {
            provider,
            tools: ToolRegistry::new(),
            config: parking_lot::RwLock::new(config),
        }
    }

    pub fn provider(&self) -> &ProviderHandle {
        &self.provider
    }

    pub fn tool_registry(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> AgentConfig {
        self.config.read().clone()
    }

    pub fn update_config<F: FnOnce(&mut AgentConfig)>(&self, f: F) {
        f(&mut self.config.write())
    }

    fn active_provider(&self) -> Result<Arc<Box<dyn krill::Provider>>> {
        self.provider
            .get()
            .ok_or_else(|| Error::new(ErrorKind::InvalidConfig, "No provider configured"))
    }

    /// Inject registry tool definitions when the request carries none,
    /// in the schema the active provider expects.
    fn inject_tools(&self, req: &mut CompletionRequest, provider_name: &str) {
        if !req.tools.is_empty() || self.tools.is_empty() {
            return;
        }
        req.tools = if provider_name == "openai" {
            self.tools.to_openai_json()
        } else {
            self.tools.to_json()
        };
    }

    fn apply_defaults(&self, req: &mut CompletionRequest, provider: &dyn krill::Provider) {
        let config = self.config.read();
        if req.model.is_empty() {
            req.model = config
                .default_model
                .clone()
                .or_else(|| provider.models().into_iter().next())
                .unwrap_or_default();
        }
        if req.system.is_none() {
            req.system = config.system_prompt.clone();
        }
    }

    /// One provider call, no tool loop.
    pub async fn process(&self, mut req: CompletionRequest) -> Result<CompletionResponse> {
        let provider = self.active_provider()?;
        self.apply_defaults(&mut req, provider.as_ref().as_ref());
        self.inject_tools(&mut req, provider.name());
        log::debug!("Processing completion request (model: {})", req.model);
        provider.complete(req).await
    }

    /// One streaming provider call, no tool loop. Chunks go to `cb`;
    /// nothing is broadcast from here.
    pub async fn process_stream(
        &self,
        mut req: CompletionRequest,
        cb: StreamCallback,
    ) -> Result<CompletionResponse> {
        let provider = self.active_provider()?;
        self.apply_defaults(&mut req, provider.as_ref().as_ref());
        self.inject_tools(&mut req, provider.name());
        log::debug!("Processing streaming request (model: {})", req.model);
        provider.stream(req, cb).await
    }

    /// Execute one tool call, packing the outcome (success or error)
    /// into a `tool_result` block.
    async fn execute_tool_call(&self, block: &ContentBlock) -> ContentBlock {
        let ContentBlock::ToolUse { id, name, input } = block else {
            return ContentBlock::ToolResult {
                tool_use_id: String::new(),
                tool_name: String::new(),
                content: json!({"error": "not a tool_use block"}),
                text: String::new(),
            };
        };

        log::info!("Executing tool call: {name} (id: {id})");

        let content = match self.tools.execute(name, input.clone()).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Tool {name} failed: {}", e.what());
                json!({"error": e.what()})
            }
        };

        ContentBlock::ToolResult {
            tool_use_id: id.clone(),
            tool_name: name.clone(),
            text: content.to_string(),
            content,
        }
    }

    /// Provider/tool loop without streaming.
    pub async fn process_with_tools(
        &self,
        req: CompletionRequest,
        max_iterations: usize,
    ) -> Result<CompletionResponse> {
        self.run_tool_loop(req, None, max_iterations, None).await
    }

    /// Provider/tool loop, streaming every provider turn through `cb`.
    /// Cancellation is observed at each loop boundary.
    pub async fn process_with_tools_stream(
        &self,
        req: CompletionRequest,
        cb: StreamCallback,
        max_iterations: usize,
        cancel: Option<CancellationToken>,
    ) -> Result<CompletionResponse> {
        self.run_tool_loop(req, Some(cb), max_iterations, cancel).await
    }

    async fn run_tool_loop(
        &self,
        mut req: CompletionRequest,
        cb: Option<StreamCallback>,
        max_iterations: usize,
        cancel: Option<CancellationToken>,
    ) -> Result<CompletionResponse> {
        let provider = self.active_provider()?;
        self.apply_defaults(&mut req, provider.as_ref().as_ref());
        self.inject_tools(&mut req, provider.name());

        log::debug!("Processing request with tool loop (max_iterations: {max_iterations})");

        let mut total_input_tokens: u32 = 0;
        let mut total_output_tokens: u32 = 0;
        let mut last_response: Option<CompletionResponse> = None;

        for iteration in 0..max_iterations {
            if let Some(token) = &cancel {
                if token.is_cancelled() {
                    return Err(Error::new(ErrorKind::Internal, "Run cancelled"));
                }
            }

            log::debug!("Tool loop iteration {}/{}", iteration + 1, max_iterations);

            let mut response = match &cb {
                Some(cb) => provider.stream(req.clone(), cb.clone()).await?,
                None => provider.complete(req.clone()).await?,
            };

            total_input_tokens += response.input_tokens;
            total_output_tokens += response.output_tokens;

            let tool_calls: Vec<ContentBlock> = response
                .message
                .tool_uses()
                .into_iter()
                .cloned()
                .collect();

            if tool_calls.is_empty() {
                response.input_tokens = total_input_tokens;
                response.output_tokens = total_output_tokens;
                return Ok(response);
            }

            log::info!("Model requested {} tool call(s)", tool_calls.len());

            // The assistant turn joins the conversation, then all tool
            // results follow as a single user-role message.
            req.messages.push(response.message.clone());

            let mut result_blocks = Vec::with_capacity(tool_calls.len());
            for call in &tool_calls {
                result_blocks.push(self.execute_tool_call(call).await);
            }
            req.messages.push(Message {
                role: Role::User,
                content: result_blocks,
                created_at: krill::timestamp_ms(),
            });

            last_response = Some(response);
        }

        log::warn!("Tool loop reached max iterations ({max_iterations})");
        let mut response = last_response
            .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "max_iterations must be at least 1"))?;
        response.input_tokens = total_input_tokens;
        response.output_tokens = total_output_tokens;
        response.stop_reason = "max_iterations".to_string();
        Ok(response)
    }
}
