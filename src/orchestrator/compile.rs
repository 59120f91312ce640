//! Compiler strategies and the compilation loop.
//!
//! A compilation searches over candidate demonstration sets and instruction
//! variants, scoring each on the dev split through the evaluation engine,
//! and retains the best configuration within the iteration budget. Ties
//! break toward the lower output-token count, then the earlier discovery.

use super::session::SessionState;
use super::QualityProfile;
use crate::dataset::{Dataset, Example};
use crate::error::{StudioError, StudioResult};
use crate::eval::{CancelFlag, EvaluationRun, Evaluator};
use crate::logging::{log_debug, log_info};
use crate::orchestrator::analysis::{Complexity, TaskType};
use crate::program::CompiledProgram;
use crate::prompt::Prompt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The closed set of optimizer strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    BootstrapFewShot,
    BootstrapFewShotWithRandomSearch,
    Mipro,
    MiproV2,
    Copro,
    BootstrapFinetune,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::BootstrapFewShot => "bootstrap_few_shot",
            OptimizerKind::BootstrapFewShotWithRandomSearch => {
                "bootstrap_few_shot_with_random_search"
            }
            OptimizerKind::Mipro => "mipro",
            OptimizerKind::MiproV2 => "mipro_v2",
            OptimizerKind::Copro => "copro",
            OptimizerKind::BootstrapFinetune => "bootstrap_finetune",
        }
    }
}

/// A bound (optimizer, parameters, metric) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    pub optimizer: OptimizerKind,
    pub params: BTreeMap<String, serde_json::Value>,
    pub metric_name: String,
}

/// Pick an optimizer for the task shape, dataset size, and quality profile.
pub fn select_compiler_strategy(
    task_type: TaskType,
    complexity: Complexity,
    dataset_size: usize,
    profile: QualityProfile,
) -> (OptimizerKind, BTreeMap<String, serde_json::Value>) {
    let kind = if dataset_size < 10 || profile == QualityProfile::FastCheap {
        OptimizerKind::BootstrapFewShot
    } else if complexity == Complexity::High && profile == QualityProfile::HighQuality {
        OptimizerKind::MiproV2
    } else if complexity == Complexity::High {
        OptimizerKind::Mipro
    } else if matches!(task_type, TaskType::Summarization | TaskType::Reasoning) {
        OptimizerKind::Copro
    } else if dataset_size >= 20 {
        OptimizerKind::BootstrapFewShotWithRandomSearch
    } else {
        OptimizerKind::BootstrapFewShot
    };

    let mut params = BTreeMap::new();
    params.insert("max_demos".to_string(), serde_json::json!(4));
    params.insert(
        "num_candidates".to_string(),
        serde_json::json!(match profile {
            QualityProfile::FastCheap => 4,
            QualityProfile::Balanced => 8,
            QualityProfile::HighQuality => 12,
        }),
    );
    params.insert("seed".to_string(), serde_json::json!(13));

    log_debug!(optimizer = kind.as_str(), dataset_size = dataset_size, "Compiler strategy selected");
    (kind, params)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStatus {
    Success,
    Failure,
}

/// Result of one `run_compilation` call.
#[derive(Debug)]
pub struct CompilationOutcome {
    pub status: CompileStatus,
    pub compiled: Option<CompiledProgram>,
    pub eval_results: Option<EvaluationRun>,
    pub error_log: Option<String>,
}

impl CompilationOutcome {
    fn failure(error_log: impl Into<String>) -> Self {
        Self {
            status: CompileStatus::Failure,
            compiled: None,
            eval_results: None,
            error_log: Some(error_log.into()),
        }
    }
}

/// One point of the optimizer's search space.
#[derive(Debug, Clone)]
struct Candidate {
    instruction: String,
    demos: Vec<Example>,
}

/// Run the configured optimizer against the train/dev splits.
pub async fn run_compilation(
    session: &SessionState,
    evaluator: &Evaluator,
    cancel: &CancelFlag,
) -> StudioResult<CompilationOutcome> {
    let spec = session
        .current_spec
        .as_ref()
        .ok_or_else(|| StudioError::optimizer("no program spec assembled"))?;
    let signature = session
        .current_signature()
        .ok_or_else(|| StudioError::optimizer("no contract signature defined"))?;
    let splits = session
        .splits
        .as_ref()
        .ok_or_else(|| StudioError::optimizer("eval splits not prepared"))?;
    let compiler = session
        .compiler
        .as_ref()
        .ok_or_else(|| StudioError::optimizer("compiler not configured"))?;
    if !session.program_finalized {
        return Err(StudioError::optimizer("program assembly not finalized"));
    }

    // Contract check against the dataset: a field the data supplies must be
    // declared by the signature before the optimizer can use it.
    let has_context = session
        .dataset
        .examples
        .iter()
        .any(|e| e.input.context.is_some());
    if has_context && !signature.has_input("context") {
        return Ok(CompilationOutcome::failure(
            "missing_field: dataset provides 'context' but the signature does not declare it",
        ));
    }

    let seed = compiler
        .params
        .get("seed")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(13);
    let max_demos = compiler
        .params
        .get("max_demos")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(4) as usize;
    let num_candidates = compiler
        .params
        .get("num_candidates")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(8) as usize;

    let candidates = generate_candidates(
        compiler.optimizer,
        &signature.instruction,
        &splits.train,
        max_demos,
        num_candidates,
        seed,
    );
    if candidates.is_empty() {
        return Ok(CompilationOutcome::failure(
            "optimizer produced no viable candidate",
        ));
    }

    // Score candidates on the dev split; fall back to train when the dev
    // split came out empty.
    let dev_examples = if splits.dev.is_empty() {
        &splits.train
    } else {
        &splits.dev
    };
    let dev_dataset = Dataset::new(format!("{}-dev", session.dataset.name), dev_examples.clone());

    let mut best: Option<(usize, f64, usize)> = None; // (index, score, output_len)
    let mut best_run: Option<EvaluationRun> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        let prompt_text = render_candidate_prompt(candidate);
        let prompt = Prompt::new(format!("compile-cand-{index}"), prompt_text)?;

        let run = match evaluator
            .evaluate(&prompt, &dev_dataset, &session.generation_params, cancel)
            .await
        {
            Ok(run) => run,
            Err(error) => {
                return Ok(CompilationOutcome::failure(format!(
                    "optimizer candidate evaluation failed: {error}"
                )));
            }
        };

        let score = run
            .metrics
            .get(&compiler.metric_name)
            .or_else(|| run.metrics.get("exact_match"))
            .copied()
            .unwrap_or(0.0);
        let output_len: usize = run
            .per_case
            .iter()
            .filter_map(|c| c.prediction.as_ref())
            .map(|p| p.len() / 4)
            .sum();

        log_debug!(
            candidate = index,
            score = score,
            output_tokens = output_len,
            "Candidate scored"
        );

        // Retain the best; ties break to fewer output tokens, then to the
        // earlier discovery.
        let better = match &best {
            None => true,
            Some((_, best_score, best_len)) => {
                score > *best_score || (score == *best_score && output_len < *best_len)
            }
        };
        if better {
            best = Some((index, score, output_len));
            best_run = Some(run);
        }
    }

    let Some((best_index, best_score, _)) = best else {
        return Ok(CompilationOutcome::failure(
            "optimizer scored no candidate before cancellation",
        ));
    };
    let winner = &candidates[best_index];

    let compiled = CompiledProgram {
        spec: spec.clone(),
        signatures: session.signatures.clone(),
        demonstrations: winner.demos.clone(),
        optimizer: compiler.optimizer.as_str().to_string(),
        optimizer_params: compiler.params.clone(),
        metric_name: compiler.metric_name.clone(),
        metric_value: best_score,
        target_lm: session.target_lm.as_str().to_string(),
        program_code: session
            .program_code
            .clone()
            .unwrap_or_else(|| spec.render_code(&session.signatures)),
    };

    log_info!(
        optimizer = compiler.optimizer.as_str(),
        candidates = candidates.len(),
        best_score = best_score,
        "Compilation finished"
    );

    Ok(CompilationOutcome {
        status: CompileStatus::Success,
        compiled: Some(compiled),
        eval_results: best_run,
        error_log: None,
    })
}

/// The candidate search space per optimizer kind. Deterministic for a given
/// seed.
fn generate_candidates(
    optimizer: OptimizerKind,
    base_instruction: &str,
    train: &[Example],
    max_demos: usize,
    num_candidates: usize,
    seed: u64,
) -> Vec<Candidate> {
    let instruction = if base_instruction.is_empty() {
        "Complete the task for the given input."
    } else {
        base_instruction
    };

    let labeled: Vec<Example> = train
        .iter()
        .filter(|e| e.expected.is_some())
        .cloned()
        .collect();

    let mut candidates = vec![Candidate {
        instruction: instruction.to_string(),
        demos: Vec::new(),
    }];

    match optimizer {
        OptimizerKind::BootstrapFewShot | OptimizerKind::BootstrapFinetune => {
            // Finetuning is out of scope for weight updates; the bootstrap
            // path doubles its demo budget instead.
            let k = if optimizer == OptimizerKind::BootstrapFinetune {
                (max_demos * 2).min(labeled.len())
            } else {
                max_demos.min(labeled.len())
            };
            if k > 0 {
                for window in labeled.windows(k).step_by(k).take(num_candidates) {
                    candidates.push(Candidate {
                        instruction: instruction.to_string(),
                        demos: window.to_vec(),
                    });
                }
            }
        }
        OptimizerKind::BootstrapFewShotWithRandomSearch => {
            let k = max_demos.min(labeled.len());
            let mut rng = fastrand::Rng::with_seed(seed);
            for _ in 0..num_candidates {
                if k == 0 {
                    break;
                }
                let mut indices: Vec<usize> = (0..labeled.len()).collect();
                for i in (1..indices.len()).rev() {
                    let j = rng.usize(0..=i);
                    indices.swap(i, j);
                }
                let demos = indices[..k].iter().map(|&i| labeled[i].clone()).collect();
                candidates.push(Candidate {
                    instruction: instruction.to_string(),
                    demos,
                });
            }
        }
        OptimizerKind::Copro => {
            for variant in instruction_variants(instruction).into_iter().take(num_candidates) {
                candidates.push(Candidate {
                    instruction: variant,
                    demos: Vec::new(),
                });
            }
        }
        OptimizerKind::Mipro | OptimizerKind::MiproV2 => {
            let k = max_demos.min(labeled.len());
            let variants = instruction_variants(instruction);
            let variant_cap = if optimizer == OptimizerKind::MiproV2 { 4 } else { 2 };
            for variant in variants.into_iter().take(variant_cap) {
                candidates.push(Candidate {
                    instruction: variant.clone(),
                    demos: Vec::new(),
                });
                if k > 0 {
                    for window in labeled.windows(k).step_by(k).take(2) {
                        candidates.push(Candidate {
                            instruction: variant.clone(),
                            demos: window.to_vec(),
                        });
                    }
                }
            }
            candidates.truncate(num_candidates.max(1) + 1);
        }
    }

    candidates
}

/// Deterministic instruction refinements used by the instruction-searching
/// optimizers.
fn instruction_variants(base: &str) -> Vec<String> {
    vec![
        format!("{base} Be precise and concise."),
        format!("{base} Answer with only the requested output, nothing else."),
        format!("{base} Think carefully before answering."),
        format!("{base} If the input is ambiguous, choose the most likely reading."),
        format!("{base} Double-check the answer before responding."),
    ]
}

/// Render a candidate into the prompt template the evaluator runs.
fn render_candidate_prompt(candidate: &Candidate) -> String {
    let mut text = candidate.instruction.clone();
    for demo in &candidate.demos {
        if let Some(expected) = demo.expected_text() {
            text.push_str(&format!(
                "\n\nExample:\nInput: {}\nOutput: {}",
                demo.input.text, expected
            ));
        }
    }
    text.push_str("\n\nInput: {input}\nOutput:");
    text
}
