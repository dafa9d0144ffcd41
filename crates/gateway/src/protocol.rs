//! Method registry and dispatcher.

use futures::FutureExt;
use futures::future::BoxFuture;
use krill::{Error, ErrorKind, Result};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

pub type HandlerFuture = BoxFuture<'static, Result<Value>>;

/// An async method handler: JSON params in, JSON result or error out.
pub type MethodHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure into a [`MethodHandler`].
pub fn handler<F, Fut>(f: F) -> MethodHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |params| f(params).boxed())
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodInfo {
    pub name: String,
    pub description: String,
    pub group: String,
}

struct Entry {
    handler: MethodHandler,
    info: MethodInfo,
}

/// Maps method names to handlers. Registration replaces by name (with a
/// warning); dispatch runs the handler and converts panics into
/// `Internal` errors.
#[derive(Default)]
pub struct Protocol {
    methods: RwLock<HashMap<String, Entry>>,
}

impl Protocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_method(
        &self,
        name: &str,
        handler: MethodHandler,
        description: &str,
        group: &str,
    ) {
        log::debug!("Registering method: {name}");
        let mut methods = self.methods.write();
        if methods.contains_key(name) {
            log::warn!("Replacing handler for method: {name}");
        }
        methods.insert(
            name.to_string(),
            Entry {
                handler,
                info: MethodInfo {
                    name: name.to_string(),
                    description: description.to_string(),
                    group: group.to_string(),
                },
            },
        );
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    pub fn methods(&self) -> Vec<MethodInfo> {
        let mut infos: Vec<MethodInfo> =
            self.methods.read().values().map(|e| e.info.clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn methods_in_group(&self, group: &str) -> Vec<MethodInfo> {
        let mut infos: Vec<MethodInfo> = self
            .methods
            .read()
            .values()
            .filter(|e| e.info.group == group)
            .map(|e| e.info.clone())
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }

    /// Dispatch one request. Unknown methods return `NotFound`; a
    /// handler panic becomes `Internal` with the panic text as detail.
    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        let handler = {
            let methods = self.methods.read();
            match methods.get(method) {
                Some(entry) => entry.handler.clone(),
                None => {
                    return Err(Error::new(
                        ErrorKind::NotFound,
                        format!("Method not found: {method}"),
                    ));
                }
            }
        };

        match std::panic::AssertUnwindSafe(handler(params)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let text = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("Method {method} panicked: {text}");
                Err(Error::with_detail(
                    ErrorKind::Internal,
                    "Method execution failed",
                    text,
                ))
            }
        }
    }
}
