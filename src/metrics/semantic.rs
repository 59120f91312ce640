//! Optional semantic backends: embedding similarity and perplexity.
//!
//! These metrics need heavy model support (an embedding model, a
//! logprob-capable LM) that a deployment may not have. They are modeled as
//! traits the evaluator holds optionally; when no backend is wired in, the
//! corresponding metrics are simply absent from results.

use crate::error::StudioResult;

/// An embedding backend: text in, dense vector out.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> StudioResult<Vec<f32>>;

    /// Identity for logs and cache partitioning.
    fn embedder_id(&self) -> &str;
}

/// A token-logprob backend for perplexity.
#[async_trait::async_trait]
pub trait LogprobBackend: Send + Sync {
    /// Natural-log probabilities of each token of `text` under the model.
    async fn token_logprobs(&self, text: &str) -> StudioResult<Vec<f64>>;
}

/// Cosine similarity of two vectors, in [-1, 1]. `None` when either vector
/// is empty, mismatched, or zero-length in norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Embedding similarity of a prediction/reference pair through a backend.
pub async fn embedding_similarity(
    embedder: &dyn Embedder,
    prediction: &str,
    reference: &str,
) -> StudioResult<Option<f64>> {
    let a = embedder.embed(prediction).await?;
    let b = embedder.embed(reference).await?;
    Ok(cosine_similarity(&a, &b))
}

/// Perplexity of a text under a logprob backend: `exp(-mean(logprob))`.
/// `None` for empty text.
pub async fn perplexity(
    backend: &dyn LogprobBackend,
    text: &str,
) -> StudioResult<Option<f64>> {
    let logprobs = backend.token_logprobs(text).await?;
    if logprobs.is_empty() {
        return Ok(None);
    }
    let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
    Ok(Some((-mean).exp()))
}
