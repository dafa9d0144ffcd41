//! `provider.*` handlers over the shared provider handle.

use crate::protocol::{Protocol, handler};
use krill::Provider;
use krill::chat::{CompletionRequest, Message};
use krill_agent::AgentRuntime;
use serde_json::{Value, json};
use std::sync::Arc;

pub fn register_provider_handlers(protocol: &Protocol, runtime: Arc<AgentRuntime>) {
    let list_runtime = runtime.clone();
    protocol.register_method(
        "provider.list",
        handler(move |_params| {
            let runtime = list_runtime.clone();
            async move {
                match runtime.provider().get() {
                    Some(provider) => Ok(json!({
                        "providers": [{
                            "name": provider.name(),
                            "models": provider.models(),
                        }],
                    })),
                    None => Ok(json!({"providers": []})),
                }
            }
        }),
        "List configured AI providers",
        "provider",
    );

    let models_runtime = runtime.clone();
    protocol.register_method(
        "provider.models",
        handler(move |_params| {
            let runtime = models_runtime.clone();
            async move {
                match runtime.provider().get() {
                    Some(provider) => Ok(json!({"models": provider.models()})),
                    None => Ok(json!({"models": []})),
                }
            }
        }),
        "List available models for a provider",
        "provider",
    );

    let status_runtime = runtime.clone();
    protocol.register_method(
        "provider.status",
        handler(move |_params| {
            let runtime = status_runtime.clone();
            async move {
                match runtime.provider().get() {
                    Some(provider) => Ok(json!({
                        "configured": true,
                        "name": provider.name(),
                    })),
                    None => Ok(json!({"configured": false})),
                }
            }
        }),
        "Check provider availability",
        "provider",
    );

    let configure_runtime = runtime.clone();
    protocol.register_method(
        "provider.configure",
        handler(move |params: Value| {
            let runtime = configure_runtime.clone();
            async move {
                let model = params.get("model").and_then(Value::as_str).map(str::to_string);
                let system_prompt = params
                    .get("systemPrompt")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                runtime.update_config(|config| {
                    if model.is_some() {
                        config.default_model = model.clone();
                    }
                    if system_prompt.is_some() {
                        config.system_prompt = system_prompt.clone();
                    }
                });
                Ok(json!({"ok": true}))
            }
        }),
        "Update provider configuration at runtime",
        "provider",
    );

    // provider.chat runs a single completion to the end; streaming and
    // the tool loop belong to the chat engine.
    protocol.register_method(
        "provider.chat",
        handler(move |params: Value| {
            let runtime = runtime.clone();
            async move {
                let message = params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if message.is_empty() {
                    return Ok(json!({"ok": false, "error": "message is required"}));
                }
                let req = CompletionRequest {
                    model: params
                        .get("model")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    messages: vec![Message::user_text(message)],
                    ..Default::default()
                };
                match runtime.process(req).await {
                    Ok(response) => Ok(json!({
                        "ok": true,
                        "text": response.message.text(),
                        "model": response.model,
                        "inputTokens": response.input_tokens,
                        "outputTokens": response.output_tokens,
                        "stopReason": response.stop_reason,
                    })),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Send a chat completion request",
        "provider",
    );

    log::info!("Registered provider handlers");
}
