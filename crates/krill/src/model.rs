//! Model identity parsing.

/// A model reference resolved to its provider and bare model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIdentity {
    pub provider: String,
    pub model: String,
}

/// Resolve a session model reference like `"anthropic/claude-sonnet-4"`,
/// `"openai:gpt-4o"`, or a bare model name.
///
/// Splits on `/` or `:` when present; otherwise infers the provider from
/// well-known model-name prefixes, falling back to `"unknown"`.
pub fn resolve_model_identity(model_ref: &str) -> ModelIdentity {
    let model_ref = model_ref.trim();

    for sep in ['/', ':'] {
        if let Some((provider, model)) = model_ref.split_once(sep) {
            if !provider.is_empty() && !model.is_empty() {
                return ModelIdentity {
                    provider: provider.to_string(),
                    model: model.to_string(),
                };
            }
        }
    }

    let provider = if model_ref.starts_with("claude-") {
        "anthropic"
    } else if model_ref.starts_with("gpt-") || model_ref.starts_with("o1-") {
        "openai"
    } else if model_ref.starts_with("gemini-") {
        "gemini"
    } else if model_ref.starts_with("mistral-") {
        "mistral"
    } else {
        "unknown"
    };

    ModelIdentity {
        provider: provider.to_string(),
        model: model_ref.to_string(),
    }
}
