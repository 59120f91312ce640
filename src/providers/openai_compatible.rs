//! Wire types and HTTP plumbing shared by OpenAI-compatible backends.
//!
//! OpenAI and Ollama speak the same chat-completions dialect, so the
//! request/response shapes and the status-to-error mapping live here once.

use crate::error::{StudioError, StudioResult};
use crate::provider::{ChatMessage, ChatRole, GenerationParams, LmResponse, TokenUsage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: WireMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

pub(crate) fn wire_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

pub(crate) fn build_request(
    model: &str,
    messages: &[ChatMessage],
    params: &GenerationParams,
) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: messages
            .iter()
            .map(|m| WireMessage {
                role: wire_role(m.role).to_string(),
                content: m.content.clone(),
            })
            .collect(),
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        top_p: params.top_p,
        stop: params.stop.clone(),
        seed: params.seed,
    }
}

/// Map an HTTP error status to the typed error contract: 401/403 are
/// authentication failures, 429 is transient with the server's retry hint,
/// other 4xx are local-fault validation errors, 5xx are retryable request
/// failures.
pub(crate) fn error_for_status(
    provider: &'static str,
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> StudioError {
    match status.as_u16() {
        401 | 403 => StudioError::authentication_failed(format!(
            "{provider} rejected credentials ({status})"
        )),
        429 => StudioError::rate_limited(retry_after.unwrap_or(30)),
        400..=499 => StudioError::validation(format!(
            "{provider} rejected request ({status}): {}",
            truncate(body, 200)
        )),
        _ => StudioError::request_failed(
            format!("{provider} returned {status}: {}", truncate(body, 200)),
            None,
        ),
    }
}

pub(crate) fn retry_after_seconds(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// POST a chat-completions request and parse the unified response.
pub(crate) async fn post_chat(
    http: &reqwest::Client,
    provider: &'static str,
    url: &str,
    headers: reqwest::header::HeaderMap,
    request: &ChatCompletionRequest,
) -> StudioResult<LmResponse> {
    let response = http
        .post(url)
        .headers(headers)
        .json(request)
        .send()
        .await
        .map_err(|e| {
            StudioError::request_failed(format!("{provider} transport error: {e}"), Some(Box::new(e)))
        })?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = retry_after_seconds(&response);
        let body = response.text().await.unwrap_or_default();
        return Err(error_for_status(provider, status, retry_after, &body));
    }

    let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
        StudioError::response_parsing(format!("{provider} response was not valid JSON: {e}"))
    })?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| StudioError::response_parsing(format!("{provider} returned no choices")))?;

    Ok(LmResponse {
        text: choice.message.content,
        usage: parsed.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
        model: parsed.model,
    })
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
