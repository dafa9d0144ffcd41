//! `tool.*` handlers: registry introspection/execution plus the
//! built-in shell, file, and HTTP tools, each gated by the relevant
//! guard before any side effect.

use crate::config::RuntimeConfig;
use crate::protocol::{Protocol, handler};
use crate::tool_policy::ToolPolicy;
use krill_agent::{AgentRuntime, Tool};
use krill_sandbox::hardlink::PathAliasPolicy;
use krill_sandbox::net::FetchGuard;
use krill_sandbox::path_alias::{assert_no_path_alias_escape, assert_path_safe};
use krill_sandbox::exec::unwrap_shell_wrapper_argv;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn workspace_roots(config: &RuntimeConfig) -> Vec<PathBuf> {
    config
        .get("sandbox.workspace_roots")
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Apply the path guards when workspace roots are configured. With no
/// roots set, the sandbox is not confining file access.
fn guard_path(config: &RuntimeConfig, path: &str, writing: bool) -> Result<(), String> {
    let roots = workspace_roots(config);
    if roots.is_empty() {
        return Ok(());
    }
    let path = PathBuf::from(path);
    let check = if writing {
        assert_path_safe(&path, &roots, PathAliasPolicy::Reject)
    } else {
        assert_no_path_alias_escape(&path, &roots)
    };
    check.map_err(|e| e.what())
}

pub fn register_tool_handlers(
    protocol: &Protocol,
    runtime: Arc<AgentRuntime>,
    policy: Arc<ToolPolicy>,
    config: Arc<RuntimeConfig>,
) {
    let list_runtime = runtime.clone();
    protocol.register_method(
        "tool.list",
        handler(move |_params| {
            let runtime = list_runtime.clone();
            async move {
                let tools = runtime.tool_registry().to_json();
                let catalog = crate::catalog::build_tools_catalog(runtime.tool_registry());
                Ok(json!({
                    "count": tools.len(),
                    "tools": tools,
                    "catalog": serde_json::to_value(catalog)?,
                }))
            }
        }),
        "List all registered tools",
        "tool",
    );

    let execute_runtime = runtime.clone();
    let execute_policy = policy.clone();
    protocol.register_method(
        "tool.execute",
        handler(move |params: Value| {
            let runtime = execute_runtime.clone();
            let policy = execute_policy.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                if name.is_empty() {
                    return Ok(json!({"ok": false, "error": "name is required"}));
                }
                let identity = params.get("identity").and_then(Value::as_str).unwrap_or_default();
                if !policy.is_allowed(name, identity) {
                    return Ok(json!({"ok": false, "error": "Tool not allowed by policy"}));
                }
                let args = params.get("params").cloned().unwrap_or_else(|| json!({}));
                match runtime.tool_registry().execute(name, args).await {
                    Ok(result) => Ok(json!({"ok": true, "result": result})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Execute a tool by name with params",
        "tool",
    );

    let describe_runtime = runtime.clone();
    protocol.register_method(
        "tool.describe",
        handler(move |params: Value| {
            let runtime = describe_runtime.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                match runtime.tool_registry().get(name) {
                    Some(tool) => Ok(json!({"ok": true, "tool": tool.definition().to_json()})),
                    None => Ok(json!({"ok": false, "error": "Tool not found"})),
                }
            }
        }),
        "Get tool schema and description",
        "tool",
    );

    for (method, enabled, description) in [
        ("tool.enable", true, "Enable a disabled tool"),
        ("tool.disable", false, "Disable a tool without unregistering"),
    ] {
        let toggle_runtime = runtime.clone();
        protocol.register_method(
            method,
            handler(move |params: Value| {
                let runtime = toggle_runtime.clone();
                async move {
                    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                    if name.is_empty() {
                        return Ok(json!({"ok": false, "error": "name is required"}));
                    }
                    match runtime.tool_registry().set_enabled(name, enabled) {
                        Ok(()) => Ok(json!({"ok": true})),
                        Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                    }
                }
            }),
            description,
            "tool",
        );
    }

    let unregister_runtime = runtime.clone();
    protocol.register_method(
        "tool.unregister",
        handler(move |params: Value| {
            let runtime = unregister_runtime.clone();
            async move {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                if runtime.tool_registry().remove(name) {
                    Ok(json!({"ok": true}))
                } else {
                    Ok(json!({"ok": false, "error": "Tool not found"}))
                }
            }
        }),
        "Unregister a dynamic tool",
        "tool",
    );

    let shell_config = config.clone();
    protocol.register_method(
        "tool.shell.exec",
        handler(move |params: Value| {
            let config = shell_config.clone();
            async move {
                let argv: Vec<String> = params
                    .get("argv")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                if argv.is_empty() {
                    return Ok(json!({"ok": false, "error": "argv is required"}));
                }

                // Wrapper depth overflow fails closed before anything runs.
                if unwrap_shell_wrapper_argv(&argv).is_none() {
                    return Ok(json!({"ok": false, "error": "Shell wrapper depth exceeded"}));
                }

                if config.get_bool("sandbox.enabled", false) {
                    let declared = params
                        .get("declaredCommand")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if !declared.is_empty()
                        && !krill_sandbox::validate_system_run_consistency(&argv, declared)
                    {
                        return Ok(json!({
                            "ok": false,
                            "error": "argv does not match the declared command",
                        }));
                    }
                }

                let timeout_ms = params.get("timeoutMs").and_then(Value::as_u64).unwrap_or(30_000);
                let output = tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    tokio::process::Command::new(&argv[0]).args(&argv[1..]).output(),
                )
                .await;

                match output {
                    Err(_) => Ok(json!({"ok": false, "error": "Command timed out"})),
                    Ok(Err(e)) => Ok(json!({"ok": false, "error": e.to_string()})),
                    Ok(Ok(out)) => Ok(json!({
                        "ok": true,
                        "exitCode": out.status.code(),
                        "stdout": String::from_utf8_lossy(&out.stdout),
                        "stderr": String::from_utf8_lossy(&out.stderr),
                    })),
                }
            }
        }),
        "Execute a shell command",
        "tool",
    );

    let read_config = config.clone();
    protocol.register_method(
        "tool.file.read",
        handler(move |params: Value| {
            let config = read_config.clone();
            async move {
                let path = params.get("path").and_then(Value::as_str).unwrap_or_default().to_string();
                if path.is_empty() {
                    return Ok(json!({"ok": false, "error": "path is required"}));
                }
                if let Err(reason) = guard_path(&config, &path, false) {
                    return Ok(json!({"ok": false, "error": reason}));
                }
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => Ok(json!({"ok": true, "content": content})),
                    Err(e) => Ok(json!({"ok": false, "error": e.to_string()})),
                }
            }
        }),
        "Read file contents",
        "tool",
    );

    let write_config = config.clone();
    protocol.register_method(
        "tool.file.write",
        handler(move |params: Value| {
            let config = write_config.clone();
            async move {
                let path = params.get("path").and_then(Value::as_str).unwrap_or_default().to_string();
                if path.is_empty() {
                    return Ok(json!({"ok": false, "error": "path is required"}));
                }
                let content = params
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Err(reason) = guard_path(&config, &path, true) {
                    return Ok(json!({"ok": false, "error": reason}));
                }
                match tokio::fs::write(&path, content).await {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.to_string()})),
                }
            }
        }),
        "Write file contents",
        "tool",
    );

    let list_config = config.clone();
    protocol.register_method(
        "tool.file.list",
        handler(move |params: Value| {
            let config = list_config.clone();
            async move {
                let path = params.get("path").and_then(Value::as_str).unwrap_or(".").to_string();
                if let Err(reason) = guard_path(&config, &path, false) {
                    return Ok(json!({"ok": false, "error": reason}));
                }
                let mut entries = Vec::new();
                let mut reader = match tokio::fs::read_dir(&path).await {
                    Ok(reader) => reader,
                    Err(e) => return Ok(json!({"ok": false, "error": e.to_string()})),
                };
                while let Ok(Some(entry)) = reader.next_entry().await {
                    let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                    entries.push(json!({
                        "name": entry.file_name().to_string_lossy(),
                        "dir": is_dir,
                    }));
                }
                Ok(json!({"ok": true, "entries": entries}))
            }
        }),
        "List directory contents",
        "tool",
    );

    let search_config = config.clone();
    protocol.register_method(
        "tool.file.search",
        handler(move |params: Value| {
            let config = search_config.clone();
            async move {
                let root = params.get("path").and_then(Value::as_str).unwrap_or(".").to_string();
                let pattern = params
                    .get("pattern")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if pattern.is_empty() {
                    return Ok(json!({"ok": false, "error": "pattern is required"}));
                }
                if let Err(reason) = guard_path(&config, &root, false) {
                    return Ok(json!({"ok": false, "error": reason}));
                }

                // Breadth-first filename match, bounded to keep replies sane.
                const MAX_RESULTS: usize = 200;
                let mut matches = Vec::new();
                let mut queue = vec![PathBuf::from(&root)];
                while let Some(dir) = queue.pop() {
                    let Ok(mut reader) = tokio::fs::read_dir(&dir).await else {
                        continue;
                    };
                    while let Ok(Some(entry)) = reader.next_entry().await {
                        if matches.len() >= MAX_RESULTS {
                            break;
                        }
                        let entry_path = entry.path();
                        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                            queue.push(entry_path);
                        } else if entry.file_name().to_string_lossy().contains(&pattern) {
                            matches.push(json!(entry_path.to_string_lossy()));
                        }
                    }
                }
                Ok(json!({"ok": true, "matches": matches}))
            }
        }),
        "Search files by pattern",
        "tool",
    );

    protocol.register_method(
        "tool.http.request",
        handler(move |params: Value| async move {
            let url = params.get("url").and_then(Value::as_str).unwrap_or_default().to_string();
            if url.is_empty() {
                return Ok(json!({"ok": false, "error": "url is required"}));
            }
            let headers: HashMap<String, String> = params
                .get("headers")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| {
                            v.as_str().map(|v| (k.to_ascii_lowercase(), v.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default();

            let guard = FetchGuard::new();
            match guard.safe_fetch(&url, headers, 5).await {
                Ok(response) => Ok(json!({
                    "ok": true,
                    "status": response.status,
                    "headers": response.headers,
                    "body": String::from_utf8_lossy(&response.body),
                })),
                Err(e) => Ok(json!({"ok": false, "error": e.what()})),
            }
        }),
        "Make an HTTP request",
        "tool",
    );

    log::info!("Registered tool handlers");
}
