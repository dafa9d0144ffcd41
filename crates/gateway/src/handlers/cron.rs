//! `cron.*` handlers over the scheduler.

use crate::protocol::{Protocol, handler};
use futures::FutureExt;
use krill_cron::{CronListParams, CronScheduler, CronTask};
use serde_json::{Value, json};
use std::sync::Arc;

/// Prefix a session key with the agent id exactly once.
fn normalize_session_key(key: &str, agent_id: &str) -> String {
    if agent_id.is_empty() {
        return key.to_string();
    }
    let prefix = format!("{agent_id}:");
    if key.starts_with(&prefix) {
        key.to_string()
    } else {
        format!("{prefix}{key}")
    }
}

fn list_params(params: &Value) -> CronListParams {
    let defaults = CronListParams::default();
    CronListParams {
        limit: params.get("limit").and_then(Value::as_u64).map(|v| v as usize).unwrap_or(defaults.limit),
        offset: params.get("offset").and_then(Value::as_u64).map(|v| v as usize).unwrap_or(defaults.offset),
        query: params.get("query").and_then(Value::as_str).map(str::to_string),
        enabled: params.get("enabled").and_then(Value::as_bool),
        sort_by: params
            .get("sortBy")
            .and_then(Value::as_str)
            .unwrap_or(&defaults.sort_by)
            .to_string(),
        sort_dir: params
            .get("sortDir")
            .and_then(Value::as_str)
            .unwrap_or(&defaults.sort_dir)
            .to_string(),
    }
}

pub fn register_cron_handlers(protocol: &Protocol, scheduler: CronScheduler) {
    let list_scheduler = scheduler.clone();
    protocol.register_method(
        "cron.list",
        handler(move |params: Value| {
            let scheduler = list_scheduler.clone();
            async move {
                let tasks = scheduler.list(&list_params(&params));
                Ok(json!({
                    "count": tasks.len(),
                    "tasks": tasks,
                    "running": scheduler.is_running(),
                }))
            }
        }),
        "List scheduled tasks",
        "cron",
    );

    let create_scheduler = scheduler.clone();
    protocol.register_method(
        "cron.create",
        handler(move |params: Value| {
            let scheduler = create_scheduler.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                let expression = params
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if name.is_empty() || expression.is_empty() {
                    return Ok(json!({"ok": false, "error": "name and expression are required"}));
                }

                let delete_after_run = params
                    .get("deleteAfterRun")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let stagger_ms = params.get("staggerMs").and_then(Value::as_u64).unwrap_or(0);

                // Optional session key for task context; normalized so an
                // agent prefix is never applied twice.
                let session_key = params
                    .get("sessionKey")
                    .and_then(Value::as_str)
                    .filter(|k| !k.is_empty())
                    .map(|key| {
                        let agent_id =
                            params.get("agentId").and_then(Value::as_str).unwrap_or_default();
                        normalize_session_key(key, agent_id)
                    });

                let task_name = name.to_string();
                let task_session_key = session_key.clone();
                let task: CronTask = Arc::new(move || {
                    let name = task_name.clone();
                    let session_key = task_session_key.clone();
                    async move {
                        match session_key {
                            Some(key) => log::info!("Cron task '{name}' executed (session={key})"),
                            None => log::info!("Cron task '{name}' executed"),
                        }
                        Ok(())
                    }
                    .boxed()
                });

                match scheduler.schedule(name, expression, task, delete_after_run, stagger_ms) {
                    Ok(registered) => {
                        let mut response = json!({"ok": true, "name": registered});
                        if let Some(key) = session_key {
                            response["sessionKey"] = json!(key);
                        }
                        Ok(response)
                    }
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Create a scheduled task",
        "cron",
    );

    let delete_scheduler = scheduler.clone();
    protocol.register_method(
        "cron.delete",
        handler(move |params: Value| {
            let scheduler = delete_scheduler.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                if name.is_empty() {
                    return Ok(json!({"ok": false, "error": "name is required"}));
                }
                match scheduler.cancel(name) {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Delete a scheduled task",
        "cron",
    );

    for (method, enabled, description) in [
        ("cron.enable", true, "Enable a scheduled task"),
        ("cron.disable", false, "Disable a scheduled task"),
    ] {
        let toggle_scheduler = scheduler.clone();
        protocol.register_method(
            method,
            handler(move |params: Value| {
                let scheduler = toggle_scheduler.clone();
                async move {
                    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                    if name.is_empty() {
                        return Ok(json!({"ok": false, "error": "name is required"}));
                    }
                    match scheduler.set_enabled(name, enabled) {
                        Ok(()) => Ok(json!({"ok": true})),
                        Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                    }
                }
            }),
            description,
            "cron",
        );
    }

    let trigger_scheduler = scheduler.clone();
    protocol.register_method(
        "cron.trigger",
        handler(move |params: Value| {
            let scheduler = trigger_scheduler.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                if name.is_empty() {
                    return Ok(json!({"ok": false, "error": "name is required"}));
                }
                match scheduler.manual_run(name) {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Manually trigger a scheduled task",
        "cron",
    );

    let status_scheduler = scheduler;
    protocol.register_method(
        "cron.status",
        handler(move |_params| {
            let scheduler = status_scheduler.clone();
            async move {
                Ok(json!({
                    "running": scheduler.is_running(),
                    "taskCount": scheduler.size(),
                }))
            }
        }),
        "Get cron scheduler status",
        "cron",
    );

    log::info!("Registered cron handlers");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_keys_are_prefixed_once() {
        assert_eq!(normalize_session_key("daily", "agent"), "agent:daily");
        assert_eq!(normalize_session_key("agent:daily", "agent"), "agent:daily");
        assert_eq!(normalize_session_key("daily", ""), "daily");
    }
}
