//! Runtime configuration: a dot-path-addressed JSON document with
//! optimistic concurrency for patches.

use krill::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

struct ConfigState {
    config: Value,
    defaults: Value,
    persist_path: Option<PathBuf>,
}

/// The gateway's mutable configuration tree. Every mutation persists to
/// the configured path (when set); `hash()` is the SHA-256 of the
/// serialized document, used as the optimistic-concurrency token for
/// `patch`.
pub struct RuntimeConfig {
    state: Mutex<ConfigState>,
}

fn compute_hash(config: &Value) -> String {
    let serialized = config.to_string();
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(digest)
}

/// Walk a dot path. Paths never index into arrays; a segment landing on
/// a non-object fails (or, in create mode, replaces it with an object).
fn navigate<'a>(root: &'a mut Value, path: &str, create: bool) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        if !current.is_object() {
            if create {
                *current = json!({});
            } else {
                return None;
            }
        }
        let map = current.as_object_mut()?;
        if !map.contains_key(segment) {
            if create {
                map.insert(segment.to_string(), json!({}));
            } else {
                return None;
            }
        }
        current = map.get_mut(segment)?;
    }
    Some(current)
}

fn navigate_ref<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

impl RuntimeConfig {
    pub fn new(initial: Value) -> Self {
        RuntimeConfig {
            state: Mutex::new(ConfigState {
                config: initial.clone(),
                defaults: initial,
                persist_path: None,
            }),
        }
    }

    pub fn set_persist_path(&self, path: PathBuf) {
        self.state.lock().persist_path = Some(path);
    }

    pub fn get(&self, path: &str) -> Value {
        let state = self.state.lock();
        navigate_ref(&state.config, path).cloned().unwrap_or(Value::Null)
    }

    /// Typed accessors with fallbacks, for the configuration knobs.
    pub fn get_u64(&self, path: &str, default: u64) -> u64 {
        self.get(path).as_u64().unwrap_or(default)
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        self.get(path).as_bool().unwrap_or(default)
    }

    pub fn get_string(&self, path: &str) -> Option<String> {
        self.get(path).as_str().map(str::to_string)
    }

    pub fn set(&self, path: &str, value: Value) {
        let mut state = self.state.lock();
        if let Some(node) = navigate(&mut state.config, path, true) {
            *node = value;
        }
        persist(&state);
    }

    /// Apply patches under the optimistic-concurrency check: when
    /// `base_hash` is non-empty and no longer matches, nothing mutates
    /// and `false` comes back.
    pub fn patch(&self, patches: &[(String, Value)], base_hash: &str) -> bool {
        let mut state = self.state.lock();

        if !base_hash.is_empty() && compute_hash(&state.config) != base_hash {
            return false;
        }

        for (path, value) in patches {
            if let Some(node) = navigate(&mut state.config, path, true) {
                *node = value.clone();
            }
        }

        persist(&state);
        true
    }

    pub fn hash(&self) -> String {
        compute_hash(&self.state.lock().config)
    }

    pub fn to_json(&self) -> Value {
        self.state.lock().config.clone()
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.config = state.defaults.clone();
        persist(&state);
    }

    pub fn list_keys(&self) -> Vec<String> {
        let state = self.state.lock();
        match state.config.as_object() {
            Some(map) => map.keys().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Merge the top-level keys of `imported` into the config.
    pub fn import(&self, imported: &Map<String, Value>) {
        let mut state = self.state.lock();
        if !state.config.is_object() {
            state.config = json!({});
        }
        if let Some(map) = state.config.as_object_mut() {
            for (key, value) in imported {
                map.insert(key.clone(), value.clone());
            }
        }
        persist(&state);
    }

    /// Load a persisted config file, falling back to `initial` when the
    /// file is absent or unreadable.
    pub fn load_or_default(path: PathBuf, initial: Value) -> Result<Self> {
        let config = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                Error::with_detail(
                    ErrorKind::InvalidConfig,
                    "Config file is not valid JSON",
                    format!("{}: {}", path.display(), e),
                )
            })?,
            Err(_) => initial.clone(),
        };

        let runtime = RuntimeConfig {
            state: Mutex::new(ConfigState {
                config,
                defaults: initial,
                persist_path: Some(path),
            }),
        };
        Ok(runtime)
    }
}

fn persist(state: &ConfigState) {
    let Some(path) = &state.persist_path else {
        return;
    };
    let rendered = match serde_json::to_string_pretty(&state.config) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("Failed to serialize config: {e}");
            return;
        }
    };
    if let Err(e) = std::fs::write(path, rendered) {
        log::warn!("Failed to persist config: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_dot_paths() {
        let config = RuntimeConfig::new(json!({"gateway": {"port": 18789}}));
        assert_eq!(config.get("gateway.port"), json!(18789));
        assert_eq!(config.get("gateway.missing"), Value::Null);

        config.set("browser.pool_size", json!(4));
        assert_eq!(config.get("browser.pool_size"), json!(4));
        assert_eq!(config.get_u64("browser.pool_size", 1), 4);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let config = RuntimeConfig::new(json!({}));
        config.set("a.b.c", json!("deep"));
        assert_eq!(config.get("a.b.c"), json!("deep"));
        assert!(config.get("a.b").is_object());
    }

    #[test]
    fn array_traversal_is_rejected() {
        let config = RuntimeConfig::new(json!({"channels": [{"name": "tg"}]}));
        assert_eq!(config.get("channels.0.name"), Value::Null);
    }

    #[test]
    fn hash_changes_with_content() {
        let config = RuntimeConfig::new(json!({"x": 1}));
        let h0 = config.hash();
        config.set("x", json!(2));
        assert_ne!(config.hash(), h0);
        config.set("x", json!(1));
        assert_eq!(config.hash(), h0);
    }

    #[test]
    fn optimistic_patch_round() {
        let config = RuntimeConfig::new(json!({"gateway": {"port": 18789}}));
        let h0 = config.hash();

        let ok = config.patch(&[("gateway.port".to_string(), json!(8000))], &h0);
        assert!(ok);
        assert_eq!(config.get("gateway.port"), json!(8000));

        // The stale hash no longer applies and nothing mutates.
        let stale = config.patch(&[("gateway.port".to_string(), json!(9000))], &h0);
        assert!(!stale);
        assert_eq!(config.get("gateway.port"), json!(8000));
    }

    #[test]
    fn empty_base_hash_skips_the_check() {
        let config = RuntimeConfig::new(json!({}));
        assert!(config.patch(&[("k".to_string(), json!(true))], ""));
        assert_eq!(config.get("k"), json!(true));
    }

    #[test]
    fn reset_restores_defaults() {
        let config = RuntimeConfig::new(json!({"keep": 1}));
        config.set("keep", json!(2));
        config.set("extra", json!(3));
        config.reset();
        assert_eq!(config.get("keep"), json!(1));
        assert_eq!(config.get("extra"), Value::Null);
    }

    #[test]
    fn import_merges_top_level() {
        let config = RuntimeConfig::new(json!({"a": 1}));
        let incoming = json!({"b": 2, "a": 10});
        config.import(incoming.as_object().unwrap());
        assert_eq!(config.get("a"), json!(10));
        assert_eq!(config.get("b"), json!(2));
    }

    #[test]
    fn persists_on_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = RuntimeConfig::new(json!({"x": 1}));
        config.set_persist_path(path.clone());
        config.set("x", json!(42));

        let reloaded = RuntimeConfig::load_or_default(path, json!({})).unwrap();
        assert_eq!(reloaded.get("x"), json!(42));
    }
}
