//! Deterministic stub provider for tests and offline runs.
//!
//! Answers from a scripted responder function, records every prompt it
//! sees, and can inject a bounded number of transient failures to exercise
//! the retry path. No network, no nondeterminism unless the responder
//! introduces it.

use crate::error::{StudioError, StudioResult};
use crate::provider::{ChatMessage, GenerationParams, LmProvider, LmResponse, TokenUsage};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

type Responder = dyn Fn(&str) -> StudioResult<String> + Send + Sync;

/// Scripted in-process backend.
pub struct StubProvider {
    model: String,
    responder: Box<Responder>,
    calls: Mutex<Vec<String>>,
    fail_remaining: AtomicU32,
}

impl std::fmt::Debug for StubProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubProvider")
            .field("model", &self.model)
            .finish()
    }
}

impl StubProvider {
    /// Answer every prompt with the prompt itself.
    pub fn echo(model: impl Into<String>) -> Self {
        Self::with_responder(model, |prompt| Ok(prompt.to_string()))
    }

    /// Answer every prompt with the same text.
    pub fn fixed(model: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::with_responder(model, move |_| Ok(text.clone()))
    }

    /// Answer with an arbitrary scripted function of the prompt.
    pub fn with_responder<F>(model: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&str) -> StudioResult<String> + Send + Sync + 'static,
    {
        Self {
            model: model.into(),
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            fail_remaining: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` calls with a transient error before answering
    /// normally. Exercises the retry executor.
    pub fn fail_next(self, n: u32) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Every prompt this stub has answered, in order.
    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// How many backend requests actually reached this stub.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn respond(&self, prompt: &str) -> StudioResult<LmResponse> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.to_string());
        }

        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(StudioError::request_failed(
                "stub transient failure injected",
                None,
            ));
        }

        let text = (self.responder)(prompt)?;
        let prompt_tokens = approx_tokens(prompt);
        let completion_tokens = approx_tokens(&text);
        Ok(LmResponse {
            text,
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
            model: Some(self.model.clone()),
        })
    }
}

fn approx_tokens(text: &str) -> u32 {
    ((text.len() / 4).max(1)) as u32
}

#[async_trait::async_trait]
impl LmProvider for StubProvider {
    async fn complete(&self, prompt: &str, _params: &GenerationParams) -> StudioResult<LmResponse> {
        self.respond(prompt)
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> StudioResult<LmResponse> {
        let joined = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.respond(&joined)
    }

    fn count_tokens(&self, text: &str) -> StudioResult<u32> {
        Ok(approx_tokens(text))
    }

    fn estimate_cost(&self, _input_tokens: u32, _output_tokens: u32) -> f64 {
        0.0
    }

    fn provider_name(&self) -> &'static str {
        "stub"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn tokenizer_id(&self) -> &str {
        "approx"
    }
}
