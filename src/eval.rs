//! The evaluation engine.
//!
//! Evaluates one or more prompts over one dataset with a chosen metric
//! suite. Four modes share the same infrastructure: reference-based,
//! label-free consistency, robustness, and the combined full report.
//!
//! Contract highlights:
//! - `per_case[i]` always corresponds to `dataset[i]`, whatever order the
//!   cases completed in (ordered fan-out via `buffered`).
//! - A case-level LM error becomes a per-case entry with an error kind and
//!   an empty metric map; it never aborts the run. Aggregates cover the
//!   non-errored cases, with `errored_cases` reported alongside.
//! - A dataset schema violation aborts before any LM call.
//! - Cancellation is cooperative: no new cases are scheduled, in-flight
//!   cases complete or time out.

use crate::client::LmClient;
use crate::dataset::{Dataset, Example};
use crate::error::{StudioError, StudioResult};
use crate::logging::{log_debug, log_info};
use crate::metrics::reference::{corpus_bleu, normalize};
use crate::metrics::{
    summarize, variance, Embedder, LlmJudge, LogprobBackend, MetricRegistry, MutualJudgement,
    Summary,
};
use crate::mutators::{
    apply_noise, inject_template, pad_to_multiplier, FormatMutator, NoiseLevel,
    INJECTION_TEMPLATES, LENGTH_MULTIPLIERS,
};
use crate::prompt::Prompt;
use crate::provider::GenerationParams;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Sentinel reported for variance-family metrics when only one sample
/// exists. Excluded from aggregates; never NaN.
pub const UNDEFINED_SINGLE_SAMPLE: &str = "undefined—n=1";

/// Cooperative cancellation flag shared with in-flight evaluations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation: scheduling stops at the next case boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-case outcome. `metrics` is empty when `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub index: usize,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    /// Error kind for failed cases ("timeout", "request_failed", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Provider context recorded with every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
}

/// One immutable evaluation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub run_id: String,
    pub prompt_id: String,
    pub prompt_version: u32,
    pub prompt_text: String,
    pub dataset_id: String,
    pub dataset_name: String,
    /// Aggregate metric means over non-errored cases.
    pub metrics: BTreeMap<String, f64>,
    /// Full distribution summaries per metric.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub summaries: BTreeMap<String, Summary>,
    pub per_case: Vec<CaseResult>,
    pub errored_cases: usize,
    pub metadata: RunMetadata,
    pub timestamp: DateTime<Utc>,
}

/// Self-consistency of one case across repeated samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseConsistency {
    pub index: usize,
    pub outputs: Vec<String>,
    /// Fraction of samples matching the modal output.
    pub agreement_rate: f64,
    /// Mean pairwise embedding similarity, when an embedder is wired in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairwise_similarity: Option<f64>,
    /// Sample variance of output token counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    /// Set to the single-sample sentinel when n = 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Self-consistency report across the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub samples_per_case: usize,
    pub per_case: Vec<CaseConsistency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_agreement: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_pairwise_similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_variance: Option<f64>,
}

/// Mutual-consistency (paired judging) report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutualConsistencyReport {
    pub prompt_a: String,
    pub prompt_b: String,
    pub judgements: usize,
    pub endorsements: usize,
    pub conflicts: usize,
    pub abstentions: usize,
    /// endorsements / judgements.
    pub cross_agreement: f64,
    /// conflicts / judgements.
    pub conflict_rate: f64,
}

/// Degradation of one format mutator against the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutatorDegradation {
    pub mutator: String,
    pub mean: f64,
    /// baseline mean minus mutated mean.
    pub drop: f64,
}

/// Format-robustness report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatRobustnessReport {
    pub metric: String,
    pub baseline_mean: f64,
    pub per_mutator: Vec<MutatorDegradation>,
    pub worst_case_drop: f64,
}

/// Context-length robustness report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LengthRobustnessReport {
    pub metric: String,
    /// (multiplier, mean metric) in multiplier order.
    pub multiplier_means: Vec<(u32, f64)>,
    /// Smallest multiplier whose mean dropped more than 20% relative to 1x.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rot_threshold: Option<u32>,
}

/// Adversarial robustness report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdversarialRobustnessReport {
    pub metric: String,
    /// Attack-success rate per noise level.
    pub noise_success: Vec<(String, f64)>,
    /// Attack-success rate of the injection-template catalog.
    pub injection_success: f64,
    /// Overall fraction of successful attacks.
    pub success_rate: f64,
    /// `100 * (1 - success_rate)`.
    pub robustness_score: f64,
}

/// Depth of a full report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportDepth {
    Quick,
    Standard,
    Comprehensive,
}

/// Combined report across modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullReport {
    pub depth: ReportDepth,
    pub reference: EvaluationRun,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_robustness: Option<FormatRobustnessReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_robustness: Option<LengthRobustnessReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adversarial: Option<AdversarialRobustnessReport>,
    /// Arithmetic mean of the available normalized sub-scores in [0, 1].
    pub overall: f64,
}

/// The evaluation engine.
pub struct Evaluator {
    client: Arc<LmClient>,
    registry: MetricRegistry,
    embedder: Option<Arc<dyn Embedder>>,
    logprob: Option<Arc<dyn LogprobBackend>>,
    judge: Option<Arc<LlmJudge>>,
    parallelism: usize,
    case_timeout: Duration,
    /// Primary metric for robustness comparisons.
    primary_metric: String,
    /// Seed for the deterministic mutators.
    seed: u64,
}

impl Evaluator {
    pub fn new(client: Arc<LmClient>) -> Self {
        Self {
            client,
            registry: MetricRegistry::default(),
            embedder: None,
            logprob: None,
            judge: None,
            parallelism: 8,
            case_timeout: Duration::from_secs(60),
            primary_metric: "exact_match".to_string(),
            seed: 17,
        }
    }

    pub fn with_registry(mut self, registry: MetricRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_logprob_backend(mut self, backend: Arc<dyn LogprobBackend>) -> Self {
        self.logprob = Some(backend);
        self
    }

    pub fn with_judge(mut self, judge: Arc<LlmJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_case_timeout(mut self, timeout: Duration) -> Self {
        self.case_timeout = timeout;
        self
    }

    pub fn with_primary_metric(mut self, metric: impl Into<String>) -> Self {
        self.primary_metric = metric.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn primary_metric(&self) -> &str {
        &self.primary_metric
    }

    /// Effective fan-out: never wider than the rate limit allows.
    fn effective_parallelism(&self) -> usize {
        let rpm = self.client.rate_limit_rpm() as usize;
        if rpm == 0 {
            // Parked limiter: keep scheduling minimal.
            1
        } else {
            self.parallelism.min(rpm).max(1)
        }
    }

    // =========================================================================
    // Reference-based mode
    // =========================================================================

    /// Evaluate a prompt over a dataset with the registered metric suite.
    pub async fn evaluate(
        &self,
        prompt: &Prompt,
        dataset: &Dataset,
        params: &GenerationParams,
        cancel: &CancelFlag,
    ) -> StudioResult<EvaluationRun> {
        dataset.validate()?;
        params.validate()?;

        let per_case = self
            .score_cases(&dataset.examples, |example| {
                prompt.render(&example.input.text, joined_context(example).as_deref())
            }, params, cancel)
            .await;

        Ok(self.assemble_run(prompt, dataset, params, per_case))
    }

    /// Score a prepared list of examples; `render` maps an example to the
    /// final prompt text. Ordering of results follows input ordering.
    async fn score_cases<R>(
        &self,
        examples: &[Example],
        render: R,
        params: &GenerationParams,
        cancel: &CancelFlag,
    ) -> Vec<CaseResult>
    where
        R: Fn(&Example) -> String,
    {
        let bound = self.effective_parallelism();
        let futures = examples.iter().enumerate().map(|(index, example)| {
            let rendered = render(example);
            let expected = example.expected_text();
            let input = example.input.text.clone();
            async move {
                if cancel.is_cancelled() {
                    return CaseResult {
                        index,
                        input,
                        prediction: None,
                        expected,
                        metrics: BTreeMap::new(),
                        error: Some("cancelled".to_string()),
                    };
                }
                self.score_one(index, input, rendered, expected, params).await
            }
        });

        stream::iter(futures).buffered(bound).collect().await
    }

    async fn score_one(
        &self,
        index: usize,
        input: String,
        rendered_prompt: String,
        expected: Option<String>,
        params: &GenerationParams,
    ) -> CaseResult {
        let outcome =
            tokio::time::timeout(self.case_timeout, self.client.complete(&rendered_prompt, params))
                .await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                return CaseResult {
                    index,
                    input,
                    prediction: None,
                    expected,
                    metrics: BTreeMap::new(),
                    error: Some(error_kind(&error).to_string()),
                };
            }
            Err(_elapsed) => {
                return CaseResult {
                    index,
                    input,
                    prediction: None,
                    expected,
                    metrics: BTreeMap::new(),
                    error: Some("timeout".to_string()),
                };
            }
        };

        let mut metrics = BTreeMap::new();
        if let Some(reference) = &expected {
            metrics = self.registry.score_all(&response.text, reference);

            if let Some(embedder) = &self.embedder {
                if let Ok(Some(similarity)) = crate::metrics::semantic::embedding_similarity(
                    embedder.as_ref(),
                    &response.text,
                    reference,
                )
                .await
                {
                    metrics.insert("embedding_similarity".to_string(), similarity);
                }
            }
        }
        if let Some(backend) = &self.logprob {
            if let Ok(Some(ppl)) =
                crate::metrics::semantic::perplexity(backend.as_ref(), &response.text).await
            {
                metrics.insert("perplexity".to_string(), ppl);
            }
        }

        CaseResult {
            index,
            input,
            prediction: Some(response.text),
            expected,
            metrics,
            error: None,
        }
    }

    fn assemble_run(
        &self,
        prompt: &Prompt,
        dataset: &Dataset,
        params: &GenerationParams,
        per_case: Vec<CaseResult>,
    ) -> EvaluationRun {
        let errored_cases = per_case.iter().filter(|c| c.error.is_some()).count();

        // Collect values per metric across non-errored cases.
        let mut by_metric: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for case in per_case.iter().filter(|c| c.error.is_none()) {
            for (name, value) in &case.metrics {
                by_metric.entry(name.clone()).or_default().push(*value);
            }
        }

        let mut metrics = BTreeMap::new();
        let mut summaries = BTreeMap::new();
        for (name, values) in &by_metric {
            if let Some(summary) = summarize(values) {
                metrics.insert(name.clone(), summary.mean);
                summaries.insert(name.clone(), summary);
            }
        }

        // Corpus-level BLEU pools n-gram statistics across cases.
        let pairs: Vec<(String, String)> = per_case
            .iter()
            .filter(|c| c.error.is_none())
            .filter_map(|c| {
                Some((c.prediction.clone()?, c.expected.clone()?))
            })
            .collect();
        if let Some(value) = corpus_bleu(&pairs, 4) {
            metrics.insert("bleu_corpus".to_string(), value);
        }

        log_info!(
            prompt_id = %prompt.id,
            dataset = %dataset.name,
            cases = per_case.len(),
            errored = errored_cases,
            "Evaluation run complete"
        );

        EvaluationRun {
            run_id: format!("run_{}", Uuid::new_v4().simple()),
            prompt_id: prompt.id.clone(),
            prompt_version: prompt.version,
            prompt_text: prompt.text.clone(),
            dataset_id: dataset.id(),
            dataset_name: dataset.name.clone(),
            metrics,
            summaries,
            per_case,
            errored_cases,
            metadata: RunMetadata {
                provider: self.client.provider_name().to_string(),
                model: self.client.model_id().to_string(),
                temperature: params.temperature,
            },
            timestamp: Utc::now(),
        }
    }

    // =========================================================================
    // Label-free consistency
    // =========================================================================

    /// Sample each case `n` times and measure output agreement. Samples are
    /// distinguished by the sampling seed so the response cache does not
    /// collapse them.
    pub async fn evaluate_self_consistency(
        &self,
        prompt: &Prompt,
        dataset: &Dataset,
        params: &GenerationParams,
        n: usize,
        cancel: &CancelFlag,
    ) -> StudioResult<ConsistencyReport> {
        dataset.validate()?;
        params.validate()?;
        let n = n.max(1);

        let mut per_case = Vec::with_capacity(dataset.len());
        for (index, example) in dataset.examples.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let rendered = prompt.render(&example.input.text, joined_context(example).as_deref());

            let sample_futures = (0..n).map(|sample| {
                let mut sample_params = params.clone();
                sample_params.seed = Some(params.seed.unwrap_or(self.seed) + sample as u64);
                let rendered = rendered.clone();
                async move {
                    self.client
                        .complete(&rendered, &sample_params)
                        .await
                        .map(|r| r.text)
                }
            });
            let outputs: Vec<String> = stream::iter(sample_futures)
                .buffered(self.effective_parallelism())
                .collect::<Vec<StudioResult<String>>>()
                .await
                .into_iter()
                .filter_map(Result::ok)
                .collect();

            per_case.push(self.case_consistency(index, outputs).await);
        }

        let defined =
            |f: fn(&CaseConsistency) -> Option<f64>| -> Vec<f64> {
                per_case.iter().filter_map(f).collect()
            };
        let agreements: Vec<f64> = per_case
            .iter()
            .filter(|c| c.note.is_none())
            .map(|c| c.agreement_rate)
            .collect();

        Ok(ConsistencyReport {
            samples_per_case: n,
            mean_agreement: summarize(&agreements).map(|s| s.mean),
            mean_pairwise_similarity: summarize(&defined(|c| c.pairwise_similarity))
                .map(|s| s.mean),
            mean_variance: summarize(&defined(|c| c.variance)).map(|s| s.mean),
            per_case,
        })
    }

    async fn case_consistency(&self, index: usize, outputs: Vec<String>) -> CaseConsistency {
        if outputs.len() < 2 {
            // Variance over a single sample is undefined; report the
            // sentinel and exclude the case from aggregates.
            return CaseConsistency {
                index,
                agreement_rate: if outputs.is_empty() { 0.0 } else { 1.0 },
                outputs,
                pairwise_similarity: None,
                variance: None,
                note: Some(UNDEFINED_SINGLE_SAMPLE.to_string()),
            };
        }

        // Agreement: share of samples matching the modal normalized output.
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for output in &outputs {
            *counts.entry(normalize(output)).or_default() += 1;
        }
        let modal = counts.values().copied().max().unwrap_or(0);
        let agreement_rate = modal as f64 / outputs.len() as f64;

        // Pairwise embedding similarity, when a backend is available.
        let pairwise_similarity = match &self.embedder {
            Some(embedder) => {
                let mut sims = Vec::new();
                for i in 0..outputs.len() {
                    for j in (i + 1)..outputs.len() {
                        if let Ok(Some(sim)) = crate::metrics::semantic::embedding_similarity(
                            embedder.as_ref(),
                            &outputs[i],
                            &outputs[j],
                        )
                        .await
                        {
                            sims.push(sim);
                        }
                    }
                }
                summarize(&sims).map(|s| s.mean)
            }
            None => None,
        };

        // Dispersion of output sizes; defined label-free.
        let lengths: Vec<f64> = outputs
            .iter()
            .map(|o| {
                self.client
                    .count_tokens(o)
                    .map(f64::from)
                    .unwrap_or_else(|_| o.len() as f64)
            })
            .collect();

        CaseConsistency {
            index,
            agreement_rate,
            pairwise_similarity,
            variance: variance(&lengths),
            outputs,
            note: None,
        }
    }

    /// Mutual consistency: prompts A and B judge each other's outputs on
    /// the same inputs. Requires a judge.
    pub async fn evaluate_mutual(
        &self,
        prompt_a: &Prompt,
        prompt_b: &Prompt,
        dataset: &Dataset,
        params: &GenerationParams,
        cancel: &CancelFlag,
    ) -> StudioResult<MutualConsistencyReport> {
        dataset.validate()?;
        let judge = self.judge.as_ref().ok_or_else(|| {
            StudioError::validation("mutual consistency requires a judge client")
        })?;

        let run_a = self.evaluate(prompt_a, dataset, params, cancel).await?;
        let run_b = self.evaluate(prompt_b, dataset, params, cancel).await?;

        let mut endorsements = 0usize;
        let mut conflicts = 0usize;
        let mut abstentions = 0usize;
        let mut judgements = 0usize;

        for (judging_prompt, judged_run) in [(prompt_a, &run_b), (prompt_b, &run_a)] {
            for case in judged_run.per_case.iter().filter(|c| c.error.is_none()) {
                if cancel.is_cancelled() {
                    break;
                }
                let Some(output) = &case.prediction else {
                    continue;
                };
                let verdict = judge
                    .judge_mutual(&judging_prompt.text, &case.input, output)
                    .await?;
                judgements += 1;
                match verdict {
                    MutualJudgement::Endorse => endorsements += 1,
                    MutualJudgement::Conflict => conflicts += 1,
                    MutualJudgement::Abstain => abstentions += 1,
                }
            }
        }

        let rate = |count: usize| {
            if judgements == 0 {
                0.0
            } else {
                count as f64 / judgements as f64
            }
        };

        Ok(MutualConsistencyReport {
            prompt_a: prompt_a.id.clone(),
            prompt_b: prompt_b.id.clone(),
            judgements,
            endorsements,
            conflicts,
            abstentions,
            cross_agreement: rate(endorsements),
            conflict_rate: rate(conflicts),
        })
    }

    /// LLM-as-judge: rate every output on the judge's criteria and fold the
    /// normalized mean into the run as `llm_judge`.
    pub async fn evaluate_with_judge(
        &self,
        prompt: &Prompt,
        dataset: &Dataset,
        params: &GenerationParams,
        cancel: &CancelFlag,
    ) -> StudioResult<EvaluationRun> {
        let judge = self.judge.as_ref().ok_or_else(|| {
            StudioError::validation("judge evaluation requires a judge client")
        })?;

        let mut run = self.evaluate(prompt, dataset, params, cancel).await?;

        let mut scores = Vec::new();
        for case in run.per_case.iter_mut().filter(|c| c.error.is_none()) {
            if cancel.is_cancelled() {
                break;
            }
            let Some(output) = &case.prediction else {
                continue;
            };
            match judge.rate(&case.input, output).await {
                Ok(verdict) => {
                    case.metrics
                        .insert("llm_judge".to_string(), verdict.normalized);
                    scores.push(verdict.normalized);
                }
                Err(error) => {
                    log_debug!(case = case.index, error = %error, "Judge rating failed");
                }
            }
        }
        if let Some(summary) = summarize(&scores) {
            run.metrics.insert("llm_judge".to_string(), summary.mean);
            run.summaries.insert("llm_judge".to_string(), summary);
        }
        Ok(run)
    }

    // =========================================================================
    // Robustness
    // =========================================================================

    /// Re-evaluate under every format mutator and report per-mutator
    /// degradation of the primary metric.
    pub async fn evaluate_format_robustness(
        &self,
        prompt: &Prompt,
        dataset: &Dataset,
        params: &GenerationParams,
        cancel: &CancelFlag,
    ) -> StudioResult<FormatRobustnessReport> {
        let baseline = self.evaluate(prompt, dataset, params, cancel).await?;
        let baseline_mean = self.primary_mean(&baseline)?;

        let mut per_mutator = Vec::new();
        for mutator in FormatMutator::ALL {
            if cancel.is_cancelled() {
                break;
            }
            let mutated = self.mutate_dataset(dataset, |text| mutator.apply(text));
            let run = self.evaluate(prompt, &mutated, params, cancel).await?;
            let mean = self.primary_mean(&run).unwrap_or(0.0);
            per_mutator.push(MutatorDegradation {
                mutator: mutator.name().to_string(),
                mean,
                drop: baseline_mean - mean,
            });
        }

        let worst_case_drop = per_mutator
            .iter()
            .map(|m| m.drop)
            .fold(0.0_f64, f64::max);

        Ok(FormatRobustnessReport {
            metric: self.primary_metric.clone(),
            baseline_mean,
            per_mutator,
            worst_case_drop,
        })
    }

    /// Replicate inputs at {1x, 2x, 4x, 8x} tokens and report the smallest
    /// multiplier at which the mean drops by more than 20% relative to 1x.
    pub async fn evaluate_length_robustness(
        &self,
        prompt: &Prompt,
        dataset: &Dataset,
        params: &GenerationParams,
        cancel: &CancelFlag,
    ) -> StudioResult<LengthRobustnessReport> {
        let mut multiplier_means = Vec::new();
        let mut baseline_mean = None;
        let mut rot_threshold = None;

        for multiplier in LENGTH_MULTIPLIERS {
            if cancel.is_cancelled() {
                break;
            }
            let seed = self.seed;
            let client = Arc::clone(&self.client);
            let count = move |text: &str| client.count_tokens(text).unwrap_or(1).max(1);
            let padded = self.mutate_dataset(dataset, |text| {
                pad_to_multiplier(text, multiplier, seed, &count)
            });
            let run = self.evaluate(prompt, &padded, params, cancel).await?;
            let mean = self.primary_mean(&run).unwrap_or(0.0);
            multiplier_means.push((multiplier, mean));

            match baseline_mean {
                None => baseline_mean = Some(mean),
                Some(base) => {
                    if rot_threshold.is_none() && base > 0.0 && mean < base * 0.8 {
                        rot_threshold = Some(multiplier);
                    }
                }
            }
        }

        Ok(LengthRobustnessReport {
            metric: self.primary_metric.clone(),
            multiplier_means,
            rot_threshold,
        })
    }

    /// Character noise at three intensities plus the injection-template
    /// catalog; an attack succeeds when it lowers a case's primary metric
    /// below its baseline value.
    pub async fn evaluate_adversarial_robustness(
        &self,
        prompt: &Prompt,
        dataset: &Dataset,
        params: &GenerationParams,
        cancel: &CancelFlag,
    ) -> StudioResult<AdversarialRobustnessReport> {
        let baseline = self.evaluate(prompt, dataset, params, cancel).await?;
        let baseline_scores = self.case_scores(&baseline);

        let mut successes = 0usize;
        let mut attacks = 0usize;
        let mut noise_success = Vec::new();

        for level in NoiseLevel::ALL {
            if cancel.is_cancelled() {
                break;
            }
            let seed = self.seed;
            let noisy = self.mutate_dataset(dataset, |text| apply_noise(text, level, seed));
            let run = self.evaluate(prompt, &noisy, params, cancel).await?;
            let (s, a) = count_attack_successes(&baseline_scores, &self.case_scores(&run));
            successes += s;
            attacks += a;
            noise_success.push((
                level.name().to_string(),
                if a == 0 { 0.0 } else { s as f64 / a as f64 },
            ));
        }

        let mut injection_successes = 0usize;
        let mut injection_attacks = 0usize;
        for template_index in 0..INJECTION_TEMPLATES.len() {
            if cancel.is_cancelled() {
                break;
            }
            let injected =
                self.mutate_dataset(dataset, |text| inject_template(text, template_index));
            let run = self.evaluate(prompt, &injected, params, cancel).await?;
            let (s, a) = count_attack_successes(&baseline_scores, &self.case_scores(&run));
            injection_successes += s;
            injection_attacks += a;
        }
        successes += injection_successes;
        attacks += injection_attacks;

        let success_rate = if attacks == 0 {
            0.0
        } else {
            successes as f64 / attacks as f64
        };

        Ok(AdversarialRobustnessReport {
            metric: self.primary_metric.clone(),
            noise_success,
            injection_success: if injection_attacks == 0 {
                0.0
            } else {
                injection_successes as f64 / injection_attacks as f64
            },
            success_rate,
            robustness_score: 100.0 * (1.0 - success_rate),
        })
    }

    // =========================================================================
    // Full report
    // =========================================================================

    /// Reference + consistency + robustness at the requested depth, with a
    /// composite overall score.
    pub async fn full_report(
        &self,
        prompt: &Prompt,
        dataset: &Dataset,
        params: &GenerationParams,
        depth: ReportDepth,
        cancel: &CancelFlag,
    ) -> StudioResult<FullReport> {
        let reference = self.evaluate(prompt, dataset, params, cancel).await?;

        let (consistency, format_robustness, length_robustness, adversarial) = match depth {
            ReportDepth::Quick => (None, None, None, None),
            ReportDepth::Standard => {
                let consistency = self
                    .evaluate_self_consistency(prompt, dataset, params, 3, cancel)
                    .await?;
                let format = self
                    .evaluate_format_robustness(prompt, dataset, params, cancel)
                    .await?;
                (Some(consistency), Some(format), None, None)
            }
            ReportDepth::Comprehensive => {
                let consistency = self
                    .evaluate_self_consistency(prompt, dataset, params, 5, cancel)
                    .await?;
                let format = self
                    .evaluate_format_robustness(prompt, dataset, params, cancel)
                    .await?;
                let length = self
                    .evaluate_length_robustness(prompt, dataset, params, cancel)
                    .await?;
                let adversarial = self
                    .evaluate_adversarial_robustness(prompt, dataset, params, cancel)
                    .await?;
                (Some(consistency), Some(format), Some(length), Some(adversarial))
            }
        };

        let mut sub_scores = Vec::new();
        if let Some(primary) = reference.metrics.get(&self.primary_metric) {
            sub_scores.push(primary.clamp(0.0, 1.0));
        }
        if let Some(report) = &consistency {
            if let Some(agreement) = report.mean_agreement {
                sub_scores.push(agreement.clamp(0.0, 1.0));
            }
        }
        if let Some(report) = &format_robustness {
            sub_scores.push((report.baseline_mean - report.worst_case_drop).clamp(0.0, 1.0));
        }
        if let Some(report) = &adversarial {
            sub_scores.push((report.robustness_score / 100.0).clamp(0.0, 1.0));
        }
        let overall = summarize(&sub_scores).map(|s| s.mean).unwrap_or(0.0);

        Ok(FullReport {
            depth,
            reference,
            consistency,
            format_robustness,
            length_robustness,
            adversarial,
            overall,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn mutate_dataset<F>(&self, dataset: &Dataset, mutate: F) -> Dataset
    where
        F: Fn(&str) -> String,
    {
        let examples = dataset
            .examples
            .iter()
            .map(|example| {
                let mut mutated = example.clone();
                mutated.input.text = mutate(&example.input.text);
                mutated
            })
            .collect();
        Dataset {
            name: dataset.name.clone(),
            version: dataset.version,
            examples,
        }
    }

    fn primary_mean(&self, run: &EvaluationRun) -> StudioResult<f64> {
        run.metrics.get(&self.primary_metric).copied().ok_or_else(|| {
            StudioError::validation(format!(
                "primary metric '{}' is absent from the run",
                self.primary_metric
            ))
        })
    }

    fn case_scores(&self, run: &EvaluationRun) -> BTreeMap<usize, f64> {
        run.per_case
            .iter()
            .filter(|c| c.error.is_none())
            .filter_map(|c| c.metrics.get(&self.primary_metric).map(|v| (c.index, *v)))
            .collect()
    }
}

/// An attack on one case succeeds when the attacked score falls strictly
/// below the baseline score for the same case.
fn count_attack_successes(
    baseline: &BTreeMap<usize, f64>,
    attacked: &BTreeMap<usize, f64>,
) -> (usize, usize) {
    let mut successes = 0usize;
    let mut attacks = 0usize;
    for (index, base) in baseline {
        attacks += 1;
        let attacked_score = attacked.get(index).copied().unwrap_or(0.0);
        if attacked_score < *base {
            successes += 1;
        }
    }
    (successes, attacks)
}

fn joined_context(example: &Example) -> Option<String> {
    example
        .input
        .context
        .as_ref()
        .map(|c| c.passages().join("\n"))
}

/// Stable error-kind strings for per-case entries and failure analysis.
pub fn error_kind(error: &StudioError) -> &'static str {
    match error {
        StudioError::Validation { .. } => "validation",
        StudioError::DatasetSchema { .. } => "dataset_schema",
        StudioError::UnsupportedProvider { .. } => "unsupported_provider",
        StudioError::UnknownTarget { .. } => "invalid_format",
        StudioError::Configuration { .. } => "configuration",
        StudioError::RequestFailed { .. } => "request_failed",
        StudioError::ResponseParsing { .. } => "response_parsing",
        StudioError::RateLimited { .. } => "rate_limited",
        StudioError::Timeout { .. } => "timeout",
        StudioError::AuthenticationFailed { .. } => "authentication_failed",
        StudioError::TokenLimitExceeded { .. } => "token_limit_exceeded",
        StudioError::ProgramSpec { .. } => "signature_mismatch",
        StudioError::Optimizer { .. } => "optimizer_failure",
        StudioError::Store { .. } => "store",
    }
}
