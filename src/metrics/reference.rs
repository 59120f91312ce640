//! Reference-based scorers: exact match, accuracy, BLEU, ROUGE-L, token F1.
//!
//! All comparisons run over normalized text: trimmed, lower-cased, internal
//! whitespace collapsed. Tokenization is whitespace splitting; this matches
//! the scale of the datasets the studio evaluates (short answers, labels,
//! summaries) without dragging in a language-specific segmenter.

use super::Scorer;
use std::collections::HashMap;

/// Normalize text for comparison.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn tokens(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Strict normalized equality: 1.0 or 0.0.
pub struct ExactMatchScorer;

impl Scorer for ExactMatchScorer {
    fn name(&self) -> &'static str {
        "exact_match"
    }

    fn score(&self, prediction: &str, reference: &str) -> Option<f64> {
        Some(if normalize(prediction) == normalize(reference) {
            1.0
        } else {
            0.0
        })
    }
}

/// Classification accuracy: exact match over normalized labels. Kept as a
/// separate name so task-type defaults can select it without aliasing.
pub struct AccuracyScorer;

impl Scorer for AccuracyScorer {
    fn name(&self) -> &'static str {
        "accuracy"
    }

    fn score(&self, prediction: &str, reference: &str) -> Option<f64> {
        ExactMatchScorer.score(prediction, reference)
    }
}

/// Smoothed BLEU-4.
///
/// Modified n-gram precision with add-one smoothing for orders above
/// unigram, geometric mean over n = 1..=max_order, brevity penalty.
/// Undefined when either side has no tokens.
pub struct BleuScorer {
    max_order: usize,
}

impl Default for BleuScorer {
    fn default() -> Self {
        Self { max_order: 4 }
    }
}

impl BleuScorer {
    fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
        let mut counts: HashMap<&[String], usize> = HashMap::new();
        if tokens.len() >= n {
            for window in tokens.windows(n) {
                *counts.entry(window).or_default() += 1;
            }
        }
        counts
    }

    fn precision(prediction: &[String], reference: &[String], n: usize) -> (usize, usize) {
        let pred_counts = Self::ngram_counts(prediction, n);
        let ref_counts = Self::ngram_counts(reference, n);
        let matched: usize = pred_counts
            .iter()
            .map(|(ngram, count)| (*count).min(ref_counts.get(ngram).copied().unwrap_or(0)))
            .sum();
        let total: usize = pred_counts.values().sum();
        (matched, total)
    }
}

impl Scorer for BleuScorer {
    fn name(&self) -> &'static str {
        "bleu"
    }

    fn score(&self, prediction: &str, reference: &str) -> Option<f64> {
        let pred = tokens(prediction);
        let reference = tokens(reference);
        if pred.is_empty() || reference.is_empty() {
            return None;
        }

        let mut log_sum = 0.0;
        for n in 1..=self.max_order {
            let (matched, total) = Self::precision(&pred, &reference, n);
            let p = if n == 1 {
                if total == 0 {
                    return Some(0.0);
                }
                matched as f64 / total as f64
            } else {
                // Add-one smoothing keeps higher orders defined on short
                // sequences.
                (matched as f64 + 1.0) / (total as f64 + 1.0)
            };
            if p == 0.0 {
                return Some(0.0);
            }
            log_sum += p.ln();
        }
        let geo_mean = (log_sum / self.max_order as f64).exp();

        let bp = if pred.len() >= reference.len() {
            1.0
        } else {
            (1.0 - reference.len() as f64 / pred.len() as f64).exp()
        };

        Some(bp * geo_mean)
    }
}

/// Corpus-level smoothed BLEU over a batch of pairs: n-gram statistics are
/// pooled across the corpus before the geometric mean, the standard
/// corpus formulation.
pub fn corpus_bleu(pairs: &[(String, String)], max_order: usize) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let tokenized: Vec<(Vec<String>, Vec<String>)> = pairs
        .iter()
        .map(|(p, r)| (tokens(p), tokens(r)))
        .filter(|(p, r)| !p.is_empty() && !r.is_empty())
        .collect();
    if tokenized.is_empty() {
        return None;
    }

    let mut log_sum = 0.0;
    for n in 1..=max_order {
        let mut matched = 0usize;
        let mut total = 0usize;
        for (pred, reference) in &tokenized {
            let (m, t) = BleuScorer::precision(pred, reference, n);
            matched += m;
            total += t;
        }
        let p = if n == 1 {
            if total == 0 {
                return Some(0.0);
            }
            matched as f64 / total as f64
        } else {
            (matched as f64 + 1.0) / (total as f64 + 1.0)
        };
        if p == 0.0 {
            return Some(0.0);
        }
        log_sum += p.ln();
    }
    let geo_mean = (log_sum / max_order as f64).exp();

    let pred_len: usize = tokenized.iter().map(|(p, _)| p.len()).sum();
    let ref_len: usize = tokenized.iter().map(|(_, r)| r.len()).sum();
    let bp = if pred_len >= ref_len {
        1.0
    } else {
        (1.0 - ref_len as f64 / pred_len as f64).exp()
    };

    Some(bp * geo_mean)
}

/// ROUGE-L: F1 over the longest common token subsequence.
pub struct RougeLScorer;

fn lcs_length(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for token_a in a {
        for (j, token_b) in b.iter().enumerate() {
            current[j + 1] = if token_a == token_b {
                prev[j] + 1
            } else {
                current[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

impl Scorer for RougeLScorer {
    fn name(&self) -> &'static str {
        "rouge_l"
    }

    fn score(&self, prediction: &str, reference: &str) -> Option<f64> {
        let pred = tokens(prediction);
        let reference = tokens(reference);
        if pred.is_empty() || reference.is_empty() {
            return None;
        }
        let lcs = lcs_length(&pred, &reference) as f64;
        if lcs == 0.0 {
            return Some(0.0);
        }
        let precision = lcs / pred.len() as f64;
        let recall = lcs / reference.len() as f64;
        Some(2.0 * precision * recall / (precision + recall))
    }
}

/// Unigram-overlap F1, the usual answer-span metric. Registered as
/// `semantic_f1`: the RAG task default, measuring content overlap rather
/// than surface equality.
pub struct TokenF1Scorer;

impl Scorer for TokenF1Scorer {
    fn name(&self) -> &'static str {
        "semantic_f1"
    }

    fn score(&self, prediction: &str, reference: &str) -> Option<f64> {
        let pred = tokens(prediction);
        let reference = tokens(reference);
        if pred.is_empty() || reference.is_empty() {
            return None;
        }

        let mut ref_counts: HashMap<&str, usize> = HashMap::new();
        for t in &reference {
            *ref_counts.entry(t.as_str()).or_default() += 1;
        }
        let mut overlap = 0usize;
        for t in &pred {
            if let Some(count) = ref_counts.get_mut(t.as_str()) {
                if *count > 0 {
                    *count -= 1;
                    overlap += 1;
                }
            }
        }
        if overlap == 0 {
            return Some(0.0);
        }
        let precision = overlap as f64 / pred.len() as f64;
        let recall = overlap as f64 / reference.len() as f64;
        Some(2.0 * precision * recall / (precision + recall))
    }
}
