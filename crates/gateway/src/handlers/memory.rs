//! `memory.*` handlers over the memory store. Embedding and RAG stay
//! behind the stubs.

use crate::protocol::{Protocol, handler};
use krill_agent::memory::MemoryStore;
use serde_json::{Value, json};
use std::sync::Arc;

fn tags_from(params: &Value) -> Vec<String> {
    params
        .get("tags")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn register_memory_handlers(protocol: &Protocol, memory: Arc<MemoryStore>) {
    let store_memory = memory.clone();
    protocol.register_method(
        "memory.store",
        handler(move |params: Value| {
            let memory = store_memory.clone();
            async move {
                let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
                if text.is_empty() {
                    return Ok(json!({"ok": false, "error": "text is required"}));
                }
                let scope = params.get("scope").and_then(Value::as_str).unwrap_or("default");
                let entry = memory.store(scope, text, tags_from(&params));
                Ok(json!({"ok": true, "id": entry.id}))
            }
        }),
        "Store a memory/fact",
        "memory",
    );

    let recall_memory = memory.clone();
    protocol.register_method(
        "memory.recall",
        handler(move |params: Value| {
            let memory = recall_memory.clone();
            async move {
                let query = params.get("query").and_then(Value::as_str).unwrap_or_default();
                if query.is_empty() {
                    return Ok(json!({"ok": false, "error": "query is required"}));
                }
                let scope = params.get("scope").and_then(Value::as_str);
                let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
                let hits = memory.recall(query, scope, limit);
                Ok(json!({"ok": true, "memories": memory.to_json(&hits)}))
            }
        }),
        "Recall memories by semantic query",
        "memory",
    );

    let search_memory = memory.clone();
    protocol.register_method(
        "memory.search",
        handler(move |params: Value| {
            let memory = search_memory.clone();
            async move {
                let query = params.get("query").and_then(Value::as_str).unwrap_or_default();
                if query.is_empty() {
                    return Ok(json!({"ok": false, "error": "query is required"}));
                }
                let scope = params.get("scope").and_then(Value::as_str);
                let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
                let tags = tags_from(&params);
                let hits = memory.search(query, scope, &tags, limit);
                Ok(json!({"ok": true, "memories": memory.to_json(&hits)}))
            }
        }),
        "Search memories with filters",
        "memory",
    );

    let delete_memory = memory.clone();
    protocol.register_method(
        "memory.delete",
        handler(move |params: Value| {
            let memory = delete_memory.clone();
            async move {
                let id = params.get("id").and_then(Value::as_str).unwrap_or_default();
                if id.is_empty() {
                    return Ok(json!({"ok": false, "error": "id is required"}));
                }
                match memory.delete(id) {
                    Ok(()) => Ok(json!({"ok": true})),
                    Err(e) => Ok(json!({"ok": false, "error": e.what()})),
                }
            }
        }),
        "Delete a specific memory",
        "memory",
    );

    let list_memory = memory.clone();
    protocol.register_method(
        "memory.list",
        handler(move |params: Value| {
            let memory = list_memory.clone();
            async move {
                let scope = params.get("scope").and_then(Value::as_str);
                let entries = memory.list(scope);
                Ok(json!({"ok": true, "count": entries.len(), "memories": memory.to_json(&entries)}))
            }
        }),
        "List stored memories",
        "memory",
    );

    let clear_memory = memory.clone();
    protocol.register_method(
        "memory.clear",
        handler(move |params: Value| {
            let memory = clear_memory.clone();
            async move {
                let scope = params.get("scope").and_then(Value::as_str);
                let removed = memory.clear(scope);
                Ok(json!({"ok": true, "removed": removed}))
            }
        }),
        "Clear all memories for a scope",
        "memory",
    );

    protocol.register_method(
        "memory.stats",
        handler(move |_params| {
            let memory = memory.clone();
            async move {
                Ok(serde_json::to_value(memory.stats())?)
            }
        }),
        "Return memory store statistics",
        "memory",
    );

    log::info!("Registered memory handlers");
}
