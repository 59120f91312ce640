//! The mediated LM client.
//!
//! Every call made anywhere in the studio flows through [`LmClient`]:
//! cache lookup, single-flight collapse of concurrent identical requests,
//! rate-limiter acquisition, retry with backoff, and cache fill. A cache
//! hit returns immediately and consumes no rate-limit budget; exactly one
//! backend request is issued per key no matter how many callers race on it.

use crate::cache::{cache_key, ResponseCache};
use crate::config::StudioConfig;
use crate::error::{StudioError, StudioResult};
use crate::internals::retry::{execute_with_retry, RetryPolicy};
use crate::logging::log_debug;
use crate::provider::{ChatMessage, GenerationParams, LmProvider, LmResponse};
use crate::providers::build_provider;
use crate::ratelimit::RateLimiter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Unified client over one provider binding.
pub struct LmClient {
    provider: Arc<dyn LmProvider>,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    recorded_cost: std::sync::Mutex<f64>,
}

impl std::fmt::Debug for LmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmClient")
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model_id())
            .finish()
    }
}

impl LmClient {
    pub fn new(
        provider: Arc<dyn LmProvider>,
        cache: Arc<ResponseCache>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            cache,
            limiter,
            retry,
            inflight: Mutex::new(HashMap::new()),
            recorded_cost: std::sync::Mutex::new(0.0),
        }
    }

    /// Build a client for a resolved target binding, sharing the
    /// process-scoped cache and limiter.
    pub fn for_target(
        config: &StudioConfig,
        target: crate::config::TargetLm,
        cache: Arc<ResponseCache>,
        limiter: Arc<RateLimiter>,
    ) -> StudioResult<Self> {
        let binding = config.resolve_target(target)?;
        let provider = build_provider(config, binding)?;
        Ok(Self::new(provider, cache, limiter, RetryPolicy::default()))
    }

    /// Single-prompt completion through the full mediation pipeline.
    pub async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> StudioResult<LmResponse> {
        if prompt.trim().is_empty() {
            return Err(StudioError::validation("prompt must be non-empty"));
        }
        params.validate()?;

        let key = self.key_for("complete", prompt, params);
        self.mediated(&key, || async move {
            self.provider.complete(prompt, params).await
        })
        .await
    }

    /// Chat completion through the full mediation pipeline.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> StudioResult<LmResponse> {
        if messages.is_empty() || messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err(StudioError::validation("chat messages must be non-empty"));
        }
        params.validate()?;

        let canonical = serde_json::to_string(messages)
            .map_err(|e| StudioError::validation(format!("unserializable messages: {e}")))?;
        let key = self.key_for("chat", &canonical, params);
        self.mediated(&key, || async move {
            self.provider.chat(messages, params).await
        })
        .await
    }

    /// Count tokens with the bound provider's tokenizer.
    pub fn count_tokens(&self, text: &str) -> StudioResult<u32> {
        self.provider.count_tokens(text)
    }

    /// Estimate the cost of a call in USD.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        self.provider.estimate_cost(input_tokens, output_tokens)
    }

    /// Accumulated estimated spend of non-cached calls on this client.
    pub fn total_cost(&self) -> f64 {
        self.recorded_cost.lock().map(|c| *c).unwrap_or(0.0)
    }

    /// Current requests-per-minute cap of the shared limiter. The
    /// evaluation engine bounds its fan-out by this.
    pub fn rate_limit_rpm(&self) -> u32 {
        self.limiter.rpm()
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    fn key_for(&self, kind: &str, payload: &str, params: &GenerationParams) -> String {
        cache_key(
            self.provider.provider_name(),
            self.provider.model_id(),
            self.provider.tokenizer_id(),
            kind,
            payload,
            params,
        )
    }

    /// The mediation pipeline shared by `complete` and `chat`.
    async fn mediated<F, Fut>(&self, key: &str, operation: F) -> StudioResult<LmResponse>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = StudioResult<LmResponse>>,
    {
        // Fast path: no backend work, no rate budget.
        if let Some(hit) = self.cache.get(key) {
            return Ok(hit);
        }

        // Single-flight: concurrent callers with the same key serialize on a
        // per-key gate; the first fills the cache, the rest hit it.
        let gate = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.to_string()).or_default())
        };
        let _guard = gate.lock().await;

        if let Some(hit) = self.cache.get(key) {
            self.forget_inflight(key).await;
            return Ok(hit);
        }

        self.limiter.acquire(self.provider.provider_name()).await;

        let result = execute_with_retry(&self.retry, &operation).await;

        match &result {
            Ok(response) => {
                self.record_cost(response);
                self.cache.set(key, response.clone());
            }
            Err(error) => {
                log_debug!(
                    provider = self.provider.provider_name(),
                    error = %error,
                    "Mediated LM call failed"
                );
            }
        }
        self.forget_inflight(key).await;
        result
    }

    async fn forget_inflight(&self, key: &str) {
        let mut inflight = self.inflight.lock().await;
        inflight.remove(key);
    }

    fn record_cost(&self, response: &LmResponse) {
        let Some(usage) = response.usage else { return };
        let cost = self
            .provider
            .estimate_cost(usage.prompt_tokens, usage.completion_tokens);
        if let Ok(mut total) = self.recorded_cost.lock() {
            *total += cost;
        }
    }
}
