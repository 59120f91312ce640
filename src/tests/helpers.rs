//! Shared test fixtures.

#![allow(dead_code)]

use crate::cache::ResponseCache;
use crate::client::LmClient;
use crate::dataset::{ContextValue, Dataset, Example};
use crate::error::StudioResult;
use crate::internals::retry::RetryPolicy;
use crate::provider::LmProvider;
use crate::providers::StubProvider;
use crate::ratelimit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;

/// A client over an arbitrary provider with a fresh memory cache and a
/// permissive rate limit.
pub fn client_for(provider: Arc<dyn LmProvider>) -> Arc<LmClient> {
    Arc::new(LmClient::new(
        provider,
        Arc::new(ResponseCache::memory_only(1024, 3600)),
        Arc::new(RateLimiter::new(600)),
        fast_retry_policy(),
    ))
}

/// A client answering every prompt with the same text.
pub fn fixed_client(text: &str) -> Arc<LmClient> {
    client_for(Arc::new(StubProvider::fixed("stub-v1", text)))
}

/// Retry policy with millisecond delays so failure tests stay fast.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        factor: 2.0,
        max_delay: Duration::from_millis(40),
        jitter: 0.25,
        request_timeout: Duration::from_secs(5),
    }
}

/// Small labeled arithmetic dataset.
pub fn arithmetic_dataset() -> Dataset {
    Dataset::new(
        "arith",
        vec![
            Example::labeled("2+2=?", "4"),
            Example::labeled("3+3=?", "6"),
            Example::labeled("5+1=?", "6"),
            Example::labeled("7+2=?", "9"),
            Example::labeled("4+4=?", "8"),
            Example::labeled("9+0=?", "9"),
        ],
    )
}

/// The arithmetic dataset with a context passage on every example.
pub fn arithmetic_dataset_with_context() -> Dataset {
    let mut dataset = arithmetic_dataset();
    for example in dataset.examples.iter_mut() {
        example.input.context = Some(ContextValue::Single(
            "Arithmetic uses base-10 integers.".to_string(),
        ));
    }
    dataset
}

/// A stub that answers arithmetic prompts correctly by looking up the
/// question inside the rendered prompt text.
pub fn arithmetic_responder() -> impl Fn(&str) -> StudioResult<String> + Send + Sync + 'static {
    let table = [
        ("2+2=?", "4"),
        ("3+3=?", "6"),
        ("5+1=?", "6"),
        ("7+2=?", "9"),
        ("4+4=?", "8"),
        ("9+0=?", "9"),
    ];
    move |prompt: &str| {
        for (question, answer) in table {
            if prompt.contains(question) {
                return Ok((*answer).to_string());
            }
        }
        Ok("unknown".to_string())
    }
}
