//! Ollama local provider.
//!
//! Ollama serves an OpenAI-compatible API from a local process, so this
//! backend reuses the shared chat-completions plumbing. No API key; cost is
//! always zero.

use super::openai_compatible::{build_request, post_chat};
use crate::error::{StudioError, StudioResult};
use crate::internals::tokens::{counter_for, TokenCounter};
use crate::logging::log_debug;
use crate::provider::{ChatMessage, GenerationParams, LmProvider, LmResponse};
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Local-process backend for Ollama models.
pub struct OllamaProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
    counter: Arc<dyn TokenCounter>,
    tokenizer: String,
}

impl OllamaProvider {
    pub fn new(
        endpoint: Option<String>,
        model: String,
        tokenizer: String,
    ) -> StudioResult<Self> {
        let base_url = endpoint.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if base_url.is_empty() {
            return Err(StudioError::configuration("Ollama base URL is required"));
        }
        let counter = counter_for(&tokenizer)?;

        log_debug!(
            provider = "ollama",
            base_url = %base_url,
            model = %model,
            "Ollama provider initialized"
        );

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            model,
            counter,
            tokenizer,
        })
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> StudioResult<LmResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = build_request(&self.model, messages, params);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        post_chat(&self.http, "ollama", &url, headers, &request).await
    }
}

#[async_trait::async_trait]
impl LmProvider for OllamaProvider {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> StudioResult<LmResponse> {
        let messages = [ChatMessage::user(prompt)];
        self.send(&messages, params).await
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> StudioResult<LmResponse> {
        self.send(messages, params).await
    }

    fn count_tokens(&self, text: &str) -> StudioResult<u32> {
        self.counter.count_tokens(text)
    }

    fn estimate_cost(&self, _input_tokens: u32, _output_tokens: u32) -> f64 {
        0.0
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn tokenizer_id(&self) -> &str {
        &self.tokenizer
    }
}
