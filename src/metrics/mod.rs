//! The metric kernel: scorers over prediction/reference pairs.
//!
//! Scorers live in a registry; a metric that cannot be computed (missing
//! backend, undefined on the input) is absent from the result map, never
//! zero-filled. Consumers already handle missing keys.

pub mod judge;
pub mod reference;
pub mod semantic;

pub use judge::{JudgeCriterion, JudgeVerdict, LlmJudge, MutualJudgement};
pub use reference::{AccuracyScorer, BleuScorer, ExactMatchScorer, RougeLScorer, TokenF1Scorer};
pub use semantic::{cosine_similarity, Embedder, LogprobBackend};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A reference-based scorer: prediction and reference in, scalar out.
///
/// `None` means the metric is undefined for this pair (for example an empty
/// reference); it is omitted from the per-case map.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, prediction: &str, reference: &str) -> Option<f64>;
}

/// Registry of reference-based scorers.
pub struct MetricRegistry {
    scorers: Vec<Box<dyn Scorer>>,
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("scorers", &self.names())
            .finish()
    }
}

impl Default for MetricRegistry {
    /// The default suite: exact match, accuracy, smoothed BLEU, ROUGE-L,
    /// and token-level F1.
    fn default() -> Self {
        let mut registry = Self { scorers: Vec::new() };
        registry.register(Box::new(ExactMatchScorer));
        registry.register(Box::new(AccuracyScorer));
        registry.register(Box::new(BleuScorer::default()));
        registry.register(Box::new(RougeLScorer));
        registry.register(Box::new(TokenF1Scorer));
        registry
    }
}

impl MetricRegistry {
    /// An empty registry; add scorers with [`register`](Self::register).
    pub fn empty() -> Self {
        Self { scorers: Vec::new() }
    }

    pub fn register(&mut self, scorer: Box<dyn Scorer>) {
        self.scorers.push(scorer);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.scorers.iter().map(|s| s.name()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scorers.iter().any(|s| s.name() == name)
    }

    /// Score one pair with every registered scorer. Undefined metrics are
    /// omitted.
    pub fn score_all(&self, prediction: &str, reference: &str) -> BTreeMap<String, f64> {
        self.scorers
            .iter()
            .filter_map(|s| {
                s.score(prediction, reference)
                    .map(|v| (s.name().to_string(), v))
            })
            .collect()
    }
}

/// Distribution summary of one metric across cases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    pub p95: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Summarize a sample. Returns `None` on an empty sample rather than NaN.
pub fn summarize(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let count = sorted.len();
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let median = if count % 2 == 0 {
        (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    } else {
        sorted[count / 2]
    };
    let p95_idx = ((count as f64 * 0.95).ceil() as usize).clamp(1, count) - 1;

    Some(Summary {
        mean,
        median,
        p95: sorted[p95_idx],
        min: sorted[0],
        max: sorted[count - 1],
        count,
    })
}

/// Sample variance. `None` for n < 2: variance at a single observation is
/// undefined, not zero.
pub fn variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some(sum_sq / (values.len() - 1) as f64)
}
