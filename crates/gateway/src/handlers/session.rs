//! `session.*` handlers over the session manager.

use crate::protocol::{Protocol, handler};
use krill_agent::session::SessionManager;
use serde_json::{Value, json};
use std::sync::Arc;

fn str_param<'a>(params: &'a Value, key: &str, default: &'a str) -> &'a str {
    params.get(key).and_then(Value::as_str).unwrap_or(default)
}

pub fn register_session_handlers(protocol: &Protocol, sessions: Arc<SessionManager>) {
    let create_sessions = sessions.clone();
    protocol.register_method(
        "session.create",
        handler(move |params: Value| {
            let sessions = create_sessions.clone();
            async move {
                let user_id = str_param(&params, "userId", "default").to_string();
                let device_id = str_param(&params, "deviceId", "default").to_string();
                let channel = params
                    .get("channel")
                    .and_then(Value::as_str)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string);

                match sessions
                    .create_session(&user_id, &device_id, channel.as_deref())
                    .await
                {
                    Ok(session) => Ok(json!({"ok": true, "session": session})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Create a new user session",
        "session",
    );

    let get_sessions = sessions.clone();
    protocol.register_method(
        "session.get",
        handler(move |params: Value| {
            let sessions = get_sessions.clone();
            async move {
                let id = str_param(&params, "id", "").to_string();
                if id.is_empty() {
                    return Ok(json!({"ok": false, "error": "id is required"}));
                }
                match sessions.get_session(&id).await {
                    Ok(session) => Ok(json!({"ok": true, "session": session})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Get session details by id",
        "session",
    );

    let list_sessions = sessions.clone();
    protocol.register_method(
        "session.list",
        handler(move |params: Value| {
            let sessions = list_sessions.clone();
            async move {
                let user_id = str_param(&params, "userId", "default").to_string();
                match sessions.list_sessions(&user_id).await {
                    Ok(list) => Ok(json!({"ok": true, "sessions": list})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "List active sessions",
        "session",
    );

    let destroy_sessions = sessions.clone();
    protocol.register_method(
        "session.destroy",
        handler(move |params: Value| {
            let sessions = destroy_sessions.clone();
            async move {
                let id = str_param(&params, "id", "").to_string();
                if id.is_empty() {
                    return Ok(json!({"ok": false, "error": "id is required"}));
                }
                match sessions.end_session(&id).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Destroy / end a session",
        "session",
    );

    let heartbeat_sessions = sessions.clone();
    protocol.register_method(
        "session.heartbeat",
        handler(move |params: Value| {
            let sessions = heartbeat_sessions.clone();
            async move {
                let id = str_param(&params, "id", "").to_string();
                if id.is_empty() {
                    return Ok(json!({"ok": false, "error": "id is required"}));
                }
                match sessions.touch_session(&id).await {
                    Ok(session) => Ok(json!({"ok": true, "state": session.state})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Keep a session alive",
        "session",
    );

    let update_sessions = sessions.clone();
    protocol.register_method(
        "session.update",
        handler(move |params: Value| {
            let sessions = update_sessions.clone();
            async move {
                let id = str_param(&params, "id", "").to_string();
                if id.is_empty() {
                    return Ok(json!({"ok": false, "error": "id is required"}));
                }
                let metadata = params.get("metadata").cloned().unwrap_or(Value::Null);
                if metadata.is_null() {
                    return Ok(json!({"ok": false, "error": "metadata is required"}));
                }
                match sessions.update_metadata(&id, metadata).await {
                    Ok(session) => Ok(json!({"ok": true, "session": session})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Update session metadata",
        "session",
    );

    let ctx_set_sessions = sessions.clone();
    protocol.register_method(
        "session.context.set",
        handler(move |params: Value| {
            let sessions = ctx_set_sessions.clone();
            async move {
                let id = str_param(&params, "id", "").to_string();
                let key = str_param(&params, "key", "").to_string();
                if id.is_empty() || key.is_empty() {
                    return Ok(json!({"ok": false, "error": "id and key are required"}));
                }
                let value = params.get("value").cloned().unwrap_or(Value::Null);
                match sessions.context_set(&id, &key, value).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Set session context variables",
        "session",
    );

    let ctx_get_sessions = sessions.clone();
    protocol.register_method(
        "session.context.get",
        handler(move |params: Value| {
            let sessions = ctx_get_sessions.clone();
            async move {
                let id = str_param(&params, "id", "").to_string();
                if id.is_empty() {
                    return Ok(json!({"ok": false, "error": "id is required"}));
                }
                let key = params.get("key").and_then(Value::as_str).map(str::to_string);
                match sessions.context_get(&id, key.as_deref()).await {
                    Ok(value) => Ok(json!({"ok": true, "value": value})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Get session context variables",
        "session",
    );

    let ctx_clear_sessions = sessions.clone();
    protocol.register_method(
        "session.context.clear",
        handler(move |params: Value| {
            let sessions = ctx_clear_sessions.clone();
            async move {
                let id = str_param(&params, "id", "").to_string();
                if id.is_empty() {
                    return Ok(json!({"ok": false, "error": "id is required"}));
                }
                match sessions.context_clear(&id).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Clear session context",
        "session",
    );

    let history_sessions = sessions;
    protocol.register_method(
        "session.history",
        handler(move |params: Value| {
            let sessions = history_sessions.clone();
            async move {
                let id = str_param(&params, "id", "").to_string();
                if id.is_empty() {
                    return Ok(json!({"ok": false, "error": "id is required"}));
                }
                // History lives in the session metadata; durable chat
                // transcripts are out of scope.
                match sessions.get_session(&id).await {
                    Ok(session) => {
                        let messages = session
                            .metadata
                            .get("history")
                            .cloned()
                            .unwrap_or_else(|| json!([]));
                        Ok(json!({"ok": true, "messages": messages}))
                    }
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Get session message history",
        "session",
    );

    log::info!("Registered session handlers");
}
