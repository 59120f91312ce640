//! Anthropic provider.
//!
//! Anthropic's Messages API differs from the OpenAI dialect in three ways
//! that matter here: the system prompt travels in a dedicated field,
//! authentication uses `x-api-key` plus a version header, and the response
//! carries a content-block list instead of choices.

use super::openai_compatible::{error_for_status, retry_after_seconds};
use crate::config::Pricing;
use crate::error::{StudioError, StudioResult};
use crate::internals::tokens::{counter_for, TokenCounter};
use crate::logging::log_debug;
use crate::provider::{ChatMessage, ChatRole, GenerationParams, LmProvider, LmResponse, TokenUsage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Cloud backend for Anthropic Claude models.
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    counter: Arc<dyn TokenCounter>,
    tokenizer: String,
    pricing: Pricing,
}

impl AnthropicProvider {
    pub fn new(
        api_key: Option<String>,
        endpoint: Option<String>,
        model: String,
        tokenizer: String,
        pricing: Pricing,
    ) -> StudioResult<Self> {
        let api_key = api_key
            .ok_or_else(|| StudioError::configuration("Anthropic API key is required"))?;
        let base_url = endpoint.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let counter = counter_for(&tokenizer)?;

        log_debug!(
            provider = "anthropic",
            base_url = %base_url,
            model = %model,
            "Anthropic provider initialized"
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

    fn build_request(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> MessagesRequest {
        // The system turn travels out of band.
        let system = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.clone())
            .reduce(|a, b| format!("{a}\n\n{b}"));

        let wire_messages = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| WireMessage {
                role: match m.role {
                    ChatRole::Assistant => "assistant",
                    _ => "user",
                },
                content: m.content.clone(),
            })
            .collect();

        MessagesRequest {
            model: self.model.clone(),
            max_tokens: params.max_tokens,
            messages: wire_messages,
            system,
            temperature: params.temperature,
            top_p: params.top_p,
            stop_sequences: params.stop.clone(),
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> StudioResult<LmResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let request = self.build_request(messages, params);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                StudioError::request_failed(
                    format!("anthropic transport error: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_seconds(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status("anthropic", status, retry_after, &body));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            StudioError::response_parsing(format!("anthropic response was not valid JSON: {e}"))
        })?;

        let text = parsed
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        Ok(LmResponse {
            text,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            }),
            model: parsed.model,
        })
    }
}

#[async_trait::async_trait]
impl LmProvider for AnthropicProvider {
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
        // cl100k approximation with a safety margin: Claude's tokenizer is
        // not public.
        let approx = self.counter.count_tokens(text)?;
        Ok((f64::from(approx) * 1.1) as u32)
    }

    fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (f64::from(input_tokens) / 1000.0) * self.pricing.input_per_1k
            + (f64::from(output_tokens) / 1000.0) * self.pricing.output_per_1k
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn tokenizer_id(&self) -> &str {
        &self.tokenizer
    }
}
