//! Shared fixtures for integration tests.

#![allow(dead_code)]

use prompt_studio::{
    Dataset, Example, HistoryStore, LmClient, Orchestrator, RateLimiter, ResponseCache,
    RetryPolicy, StubProvider, StudioConfig, StudioResult,
};
use std::sync::Arc;

/// A full orchestrator wired to the builtin configuration, a fresh memory
/// cache, a permissive rate limit, and a store rooted in `store_dir`.
pub fn orchestrator_with(
    store_dir: &std::path::Path,
    provider: Arc<StubProvider>,
) -> Orchestrator {
    let config = StudioConfig::with_builtin_providers();
    let cache = Arc::new(ResponseCache::memory_only(4096, 3600));
    let limiter = Arc::new(RateLimiter::new(600));
    let store = Arc::new(HistoryStore::open(store_dir).unwrap());
    Orchestrator::new(config, cache, limiter, store).with_provider(provider)
}

/// A client over the given stub with fresh mediation services.
pub fn client_over(provider: Arc<StubProvider>) -> Arc<LmClient> {
    Arc::new(LmClient::new(
        provider,
        Arc::new(ResponseCache::memory_only(1024, 3600)),
        Arc::new(RateLimiter::new(600)),
        RetryPolicy::default(),
    ))
}

/// Six labeled arithmetic examples.
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

/// A stub that answers any prompt containing a known arithmetic question.
pub fn arithmetic_stub() -> Arc<StubProvider> {
    Arc::new(StubProvider::with_responder("stub-v1", |prompt: &str| {
        let table = [
            ("2+2=?", "4"),
            ("3+3=?", "6"),
            ("5+1=?", "6"),
            ("7+2=?", "9"),
            ("4+4=?", "8"),
            ("9+0=?", "9"),
        ];
        for (question, answer) in table {
            if prompt.contains(question) {
                return Ok(answer.to_string());
            }
        }
        Ok("unknown".to_string())
    }))
}

/// A stub whose answers are always wrong, for low-metric paths.
pub fn wrong_answer_stub() -> Arc<StubProvider> {
    Arc::new(StubProvider::fixed("stub-v1", "definitely wrong"))
}

pub fn ok(s: &str) -> StudioResult<String> {
    Ok(s.to_string())
}
