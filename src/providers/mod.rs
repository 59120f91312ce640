//! Concrete LM backends.
//!
//! Cloud backends (OpenAI, Anthropic) speak JSON over HTTPS; Ollama serves
//! an OpenAI-compatible API from a local process; the stub backend answers
//! deterministically for tests and offline runs. All of them sit behind
//! [`LmProvider`](crate::provider::LmProvider) and are built from the
//! configuration document through [`build_provider`].

pub mod anthropic;
pub mod ollama;
pub mod openai;
mod openai_compatible;
pub mod stub;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use stub::StubProvider;

use crate::config::{ModelBinding, StudioConfig};
use crate::error::{StudioError, StudioResult};
use crate::provider::LmProvider;
use std::sync::Arc;

/// API key for a provider, from the provider-specific environment variable.
///
/// Key material never lives in the configuration document; this is the one
/// sanctioned environment read outside config overrides.
pub fn provider_api_key(provider: &str) -> Option<String> {
    let var = match provider {
        "openai" => "OPENAI_API_KEY",
        "anthropic" => "ANTHROPIC_API_KEY",
        _ => return None,
    };
    std::env::var(var).ok()
}

/// Build the backend for one resolved model binding.
pub fn build_provider(
    config: &StudioConfig,
    binding: &ModelBinding,
) -> StudioResult<Arc<dyn LmProvider>> {
    let entry = config.providers.get(&binding.provider).ok_or_else(|| {
        StudioError::configuration(format!("unknown provider '{}'", binding.provider))
    })?;

    let provider: Arc<dyn LmProvider> = match binding.provider.as_str() {
        "openai" => Arc::new(OpenAiProvider::new(
            provider_api_key("openai"),
            entry.endpoint.clone(),
            binding.model.clone(),
            entry.tokenizer.clone(),
            entry.pricing,
        )?),
        "anthropic" => Arc::new(AnthropicProvider::new(
            provider_api_key("anthropic"),
            entry.endpoint.clone(),
            binding.model.clone(),
            entry.tokenizer.clone(),
            entry.pricing,
        )?),
        "ollama" => Arc::new(OllamaProvider::new(
            entry.endpoint.clone(),
            binding.model.clone(),
            entry.tokenizer.clone(),
        )?),
        "stub" => Arc::new(StubProvider::echo(binding.model.clone())),
        other => return Err(StudioError::unsupported_provider(other)),
    };
    Ok(provider)
}
