//! OpenAI provider.

use super::openai_compatible::{build_request, post_chat};
use crate::config::Pricing;
use crate::error::{StudioError, StudioResult};
use crate::internals::tokens::{counter_for, TokenCounter};
use crate::logging::log_debug;
use crate::provider::{ChatMessage, GenerationParams, LmProvider, LmResponse};
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Cloud backend for OpenAI chat models.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    counter: Arc<dyn TokenCounter>,
    tokenizer: String,
    pricing: Pricing,
}

impl OpenAiProvider {
    pub fn new(
        api_key: Option<String>,
        endpoint: Option<String>,
        model: String,
        tokenizer: String,
        pricing: Pricing,
    ) -> StudioResult<Self> {
        let api_key = api_key
            .ok_or_else(|| StudioError::configuration("OpenAI API key is required"))?;
        let base_url = endpoint.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let counter = counter_for(&tokenizer)?;

        log_debug!(
            provider = "openai",
            base_url = %base_url,
            model = %model,
            "OpenAI provider initialized"
        );

        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            counter,
            tokenizer,
            pricing,
        })
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Ok(value) =
            reqwest::header::HeaderValue::from_str(&format!("Bearer {}", self.api_key))
        {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        headers
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> StudioResult<LmResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = build_request(&self.model, messages, params);
        post_chat(&self.http, "openai", &url, self.headers(), &request).await
    }
}

#[async_trait::async_trait]
impl LmProvider for OpenAiProvider {
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

    fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (f64::from(input_tokens) / 1000.0) * self.pricing.input_per_1k
            + (f64::from(output_tokens) / 1000.0) * self.pricing.output_per_1k
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn tokenizer_id(&self) -> &str {
        &self.tokenizer
    }
}
