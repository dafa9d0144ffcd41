//! `agent.*` configuration and conversation handlers. The chat methods
//! themselves are registered by the chat engine.

use crate::config::RuntimeConfig;
use crate::protocol::{Protocol, handler};
use krill::Provider;
use krill_agent::AgentRuntime;
use krill_agent::session::SessionManager;
use serde_json::{Value, json};
use std::sync::Arc;

const THINKING_MODES: &[&str] = &["none", "basic", "extended"];

pub fn register_agent_handlers(
    protocol: &Protocol,
    runtime: Arc<AgentRuntime>,
    sessions: Arc<SessionManager>,
    config: Arc<RuntimeConfig>,
) {
    let prompt_get_runtime = runtime.clone();
    protocol.register_method(
        "agent.system_prompt.get",
        handler(move |_params| {
            let runtime = prompt_get_runtime.clone();
            async move {
                Ok(json!({"systemPrompt": runtime.config().system_prompt}))
            }
        }),
        "Get the current system prompt",
        "agent",
    );

    let prompt_set_runtime = runtime.clone();
    protocol.register_method(
        "agent.system_prompt.set",
        handler(move |params: Value| {
            let runtime = prompt_set_runtime.clone();
            async move {
                let prompt = params.get("systemPrompt").and_then(Value::as_str).map(str::to_string);
                runtime.update_config(|c| c.system_prompt = prompt.clone());
                Ok(json!({"ok": true}))
            }
        }),
        "Set the system prompt",
        "agent",
    );

    let thinking_get_config = config.clone();
    protocol.register_method(
        "agent.thinking.get",
        handler(move |_params| {
            let config = thinking_get_config.clone();
            async move {
                let mode = config
                    .get_string("agent.thinking")
                    .unwrap_or_else(|| "none".to_string());
                Ok(json!({"thinking": mode}))
            }
        }),
        "Get current thinking mode",
        "agent",
    );

    let thinking_set_config = config.clone();
    protocol.register_method(
        "agent.thinking.set",
        handler(move |params: Value| {
            let config = thinking_set_config.clone();
            async move {
                let mode = params.get("thinking").and_then(Value::as_str).unwrap_or_default();
                if !THINKING_MODES.contains(&mode) {
                    return Ok(json!({
                        "ok": false,
                        "error": "thinking must be one of none, basic, extended",
                    }));
                }
                config.set("agent.thinking", json!(mode));
                Ok(json!({"ok": true}))
            }
        }),
        "Set thinking mode (none, basic, extended)",
        "agent",
    );

    let model_get_runtime = runtime.clone();
    protocol.register_method(
        "agent.model.get",
        handler(move |_params| {
            let runtime = model_get_runtime.clone();
            async move {
                let configured = runtime.config().default_model;
                let fallback = runtime
                    .provider()
                    .get()
                    .and_then(|p| p.models().into_iter().next());
                Ok(json!({"model": configured.or(fallback)}))
            }
        }),
        "Get the active model",
        "agent",
    );

    let model_set_runtime = runtime;
    protocol.register_method(
        "agent.model.set",
        handler(move |params: Value| {
            let runtime = model_set_runtime.clone();
            async move {
                let model = params.get("model").and_then(Value::as_str).unwrap_or_default();
                if model.is_empty() {
                    return Ok(json!({"ok": false, "error": "model is required"}));
                }
                let identity = krill::model::resolve_model_identity(model);
                runtime.update_config(|c| c.default_model = Some(identity.model.clone()));
                Ok(json!({"ok": true, "provider": identity.provider, "model": identity.model}))
            }
        }),
        "Set the active model",
        "agent",
    );

    // Conversations are sessions with a title; they live in the same
    // store.
    let create_sessions = sessions.clone();
    protocol.register_method(
        "agent.conversation.create",
        handler(move |params: Value| {
            let sessions = create_sessions.clone();
            async move {
                let title = params
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("New conversation")
                    .to_string();
                match sessions.create_session("default", "gateway", None).await {
                    Ok(session) => {
                        let id = session.id.clone();
                        let _ = sessions.context_set(&id, "title", json!(title)).await;
                        Ok(json!({"ok": true, "conversationId": id, "title": title}))
                    }
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Create a new conversation",
        "agent",
    );

    let list_sessions = sessions.clone();
    protocol.register_method(
        "agent.conversation.list",
        handler(move |_params| {
            let sessions = list_sessions.clone();
            async move {
                match sessions.list_sessions("default").await {
                    Ok(list) => {
                        let rendered: Vec<Value> = list
                            .iter()
                            .map(|s| {
                                json!({
                                    "conversationId": s.id,
                                    "title": s.metadata["context"]["title"],
                                    "updatedAt": s.updated_at,
                                })
                            })
                            .collect();
                        Ok(json!({"ok": true, "conversations": rendered}))
                    }
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "List conversations",
        "agent",
    );

    let get_sessions = sessions.clone();
    protocol.register_method(
        "agent.conversation.get",
        handler(move |params: Value| {
            let sessions = get_sessions.clone();
            async move {
                let id = params
                    .get("conversationId")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if id.is_empty() {
                    return Ok(json!({"ok": false, "error": "conversationId is required"}));
                }
                match sessions.get_session(id).await {
                    Ok(session) => Ok(json!({"ok": true, "conversation": session})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Get conversation details and messages",
        "agent",
    );

    let delete_sessions = sessions.clone();
    protocol.register_method(
        "agent.conversation.delete",
        handler(move |params: Value| {
            let sessions = delete_sessions.clone();
            async move {
                let id = params
                    .get("conversationId")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if id.is_empty() {
                    return Ok(json!({"ok": false, "error": "conversationId is required"}));
                }
                match sessions.end_session(id).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Delete a conversation",
        "agent",
    );

    protocol.register_method(
        "agent.conversation.rename",
        handler(move |params: Value| {
            let sessions = sessions.clone();
            async move {
                let id = params
                    .get("conversationId")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let title = params.get("title").and_then(Value::as_str).unwrap_or_default();
                if id.is_empty() || title.is_empty() {
                    return Ok(json!({"ok": false, "error": "conversationId and title are required"}));
                }
                match sessions.context_set(id, "title", json!(title)).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Rename a conversation",
        "agent",
    );

    log::info!("Registered agent handlers");
}
