//! Scoped memory store backing the `memory.*` handler group.
//!
//! Recall is plain keyword scoring over stored text. Embedding-based
//! retrieval is a provider concern and stays behind the RPC stubs.

use krill::{Error, ErrorKind, Result};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct MemoryEntry {
    pub id: String,
    pub scope: String,
    pub text: String,
    pub tags: Vec<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total_entries: usize,
    pub scopes: HashMap<String, usize>,
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, scope: &str, text: &str, tags: Vec<String>) -> MemoryEntry {
        let entry = MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            text: text.to_string(),
            tags,
            created_at: krill::timestamp_ms(),
        };
        self.entries.write().insert(entry.id.clone(), entry.clone());
        entry
    }

    pub fn get(&self, id: &str) -> Option<MemoryEntry> {
        self.entries.read().get(id).cloned()
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        match self.entries.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(Error::with_detail(
                ErrorKind::NotFound,
                "Memory not found",
                id.to_string(),
            )),
        }
    }

    pub fn list(&self, scope: Option<&str>) -> Vec<MemoryEntry> {
        let mut entries: Vec<MemoryEntry> = self
            .entries
            .read()
            .values()
            .filter(|e| scope.map(|s| e.scope == s).unwrap_or(true))
            .cloned()
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        entries
    }

    /// Keyword recall: entries scored by how many query terms they
    /// contain, best first.
    pub fn recall(&self, query: &str, scope: Option<&str>, limit: usize) -> Vec<MemoryEntry> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, MemoryEntry)> = self
            .entries
            .read()
            .values()
            .filter(|e| scope.map(|s| e.scope == s).unwrap_or(true))
            .filter_map(|e| {
                let haystack = e.text.to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (score > 0).then(|| (score, e.clone()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));
        scored.into_iter().take(limit).map(|(_, e)| e).collect()
    }

    /// Search with optional tag filter on top of recall.
    pub fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        tags: &[String],
        limit: usize,
    ) -> Vec<MemoryEntry> {
        self.recall(query, scope, usize::MAX)
            .into_iter()
            .filter(|e| tags.is_empty() || tags.iter().any(|t| e.tags.contains(t)))
            .take(limit)
            .collect()
    }

    /// Drop all entries in `scope`, or everything when `scope` is None.
    /// Returns how many entries were removed.
    pub fn clear(&self, scope: Option<&str>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        match scope {
            Some(scope) => entries.retain(|_, e| e.scope != scope),
            None => entries.clear(),
        }
        before - entries.len()
    }

    pub fn stats(&self) -> MemoryStats {
        let entries = self.entries.read();
        let mut scopes: HashMap<String, usize> = HashMap::new();
        for entry in entries.values() {
            *scopes.entry(entry.scope.clone()).or_default() += 1;
        }
        MemoryStats {
            total_entries: entries.len(),
            scopes,
        }
    }

    pub fn to_json(&self, entries: &[MemoryEntry]) -> Value {
        serde_json::to_value(entries).unwrap_or(Value::Null)
    }
}
