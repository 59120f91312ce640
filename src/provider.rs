//! Provider trait and types for the LM abstraction.
//!
//! Defines the [`LmProvider`] capability trait every backend implements,
//! the request parameter bundle with local validation, and the unified
//! response shape. Concrete backends live in [`crate::providers`]; callers
//! go through [`crate::client::LmClient`], which mediates every call with
//! caching, rate limiting, and retry.

use crate::error::{StudioError, StudioResult};
use serde::{Deserialize, Serialize};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Generation parameters for one LM call.
///
/// Participates byte-for-byte in the response-cache key, so two calls with
/// the same bundle within TTL return the identical response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    /// Stop sequences, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Sampling seed, where the backend supports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
            top_p: 0.95,
            stop: Vec::new(),
            seed: None,
        }
    }
}

impl GenerationParams {
    /// Validate the bundle locally. Rejected bundles never reach a backend.
    pub fn validate(&self) -> StudioResult<()> {
        if self.max_tokens < 1 {
            return Err(StudioError::validation("max_tokens must be >= 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(StudioError::validation(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(StudioError::validation(format!(
                "top_p must be within (0, 1], got {}",
                self.top_p
            )));
        }
        Ok(())
    }

    /// Canonical form for the cache key bundle.
    pub fn cache_fragment(&self) -> String {
        format!(
            "t={:.4};p={:.4};m={};stop={};seed={}",
            self.temperature,
            self.top_p,
            self.max_tokens,
            self.stop.join("\u{1f}"),
            self.seed.map_or_else(|| "-".to_string(), |s| s.to_string()),
        )
    }
}

/// Token usage reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Unified response from an LM call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmResponse {
    /// Primary text content.
    pub text: String,
    /// Usage, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Model that generated the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl LmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            model: None,
        }
    }
}

/// Capability trait for LM backends.
///
/// The surface is deliberately small: completion, chat, token counting, and
/// cost estimation. No inheritance depth beyond this one trait; everything
/// richer (caching, limiting, retry, single-flight) belongs to
/// [`LmClient`](crate::client::LmClient).
#[async_trait::async_trait]
pub trait LmProvider: Send + Sync {
    /// Single-prompt completion.
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> StudioResult<LmResponse>;

    /// Multi-turn chat completion.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> StudioResult<LmResponse>;

    /// Count tokens with this provider's tokenizer.
    fn count_tokens(&self, text: &str) -> StudioResult<u32>;

    /// Estimate the cost of a call in USD.
    fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64;

    /// Provider name for logging and cache keys.
    fn provider_name(&self) -> &'static str;

    /// Concrete model identifier.
    fn model_id(&self) -> &str;

    /// Tokenizer identity; part of the cache key bundle.
    fn tokenizer_id(&self) -> &str;
}
