//! The LLM provider contract and the swap-capable handle the agent
//! runtime reads it through.

use crate::chat::{CompletionRequest, CompletionResponse, StreamCallback};
use crate::error::Result;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::Arc;

/// An LLM backend. Concrete implementations (HTTP clients for the various
/// vendor APIs) live outside this workspace; the gateway only depends on
/// this contract.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short provider identifier, e.g. `"anthropic"` or `"openai"`.
    /// Drives the tool-definition schema the runtime injects.
    fn name(&self) -> &str;

    /// Models this provider can serve, preferred first.
    fn models(&self) -> Vec<String>;

    /// Run a completion to the end and return the full response.
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse>;

    /// Run a completion, invoking `cb` for every chunk as it arrives.
    /// Returns the assembled response once the stream ends. The callback
    /// may be invoked from a provider-owned thread.
    async fn stream(
        &self,
        req: CompletionRequest,
        cb: StreamCallback,
    ) -> Result<CompletionResponse>;
}

/// Shared, hot-swappable reference to the active provider.
///
/// The runtime holds one of these and reads it on every call; handlers
/// can swap the provider at runtime without tearing anything down.
#[derive(Default)]
pub struct ProviderHandle {
    current: ArcSwapOption<Box<dyn Provider>>,
}

impl ProviderHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, provider: Box<dyn Provider>) {
        log::info!("Provider set: {}", provider.name());
        self.current.store(Some(Arc::new(provider)));
    }

    pub fn clear(&self) {
        self.current.store(None);
    }

    pub fn get(&self) -> Option<Arc<Box<dyn Provider>>> {
        self.current.load_full()
    }

    pub fn is_configured(&self) -> bool {
        self.current.load().is_some()
    }
}
