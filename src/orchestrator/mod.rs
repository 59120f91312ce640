//! The orchestrator agent.
//!
//! Given a business task, a target LM, and a labeled dataset, the agent
//! plans and compiles a multi-module LM program, self-corrects on failure,
//! and emits a reproducible artifact. The Reason-Act-Observe loop is an
//! explicit state machine: one action in flight at a time, every transition
//! recorded as a step event, bounded by an iteration cap and a wall-clock
//! budget. Budget exhaustion returns a partial result with the full step
//! history; it is never an exception.

pub mod analysis;
pub mod assembly;
pub mod compile;
pub mod events;
pub mod package;
pub mod session;
pub mod tools;

pub use analysis::{
    Complexity, ErrorType, FailureAnalysis, FailureSeverity, FixAction, FixStep, SafetyLevel,
    TaskAnalysis, TaskType,
};
pub use compile::{CompileStatus, CompilerConfig, OptimizerKind};
pub use events::{StepEvent, StepRecorder, StepSink, StepStatus};
pub use package::PackageFormat;
pub use session::SessionState;
pub use tools::{dispatch, ToolCall, ToolContext, ToolOutput};

use crate::cache::ResponseCache;
use crate::config::{StudioConfig, TargetLm};
use crate::dataset::{Dataset, SplitRatios};
use crate::error::{StudioError, StudioResult};
use crate::eval::{error_kind, CancelFlag, EvaluationRun};
use crate::logging::{log_info, log_warn};
use crate::program::{ModuleKind, TacticPosition};
use crate::provider::GenerationParams;
use crate::ratelimit::RateLimiter;
use crate::signature::{FieldSpec, SemanticType};
use crate::store::HistoryStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Predefined LM parameter bundles.
///
/// | Profile | temperature | max_tokens | top_p |
/// |---------|-------------|------------|-------|
/// | FastCheap | 0.1 | 1024 | 0.9 |
/// | Balanced | 0.2 | 2048 | 0.95 |
/// | HighQuality | 0.3 | 4096 | 0.98 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityProfile {
    FastCheap,
    Balanced,
    HighQuality,
}

impl QualityProfile {
    pub fn generation_params(&self) -> GenerationParams {
        let (temperature, max_tokens, top_p) = match self {
            QualityProfile::FastCheap => (0.1, 1024, 0.9),
            QualityProfile::Balanced => (0.2, 2048, 0.95),
            QualityProfile::HighQuality => (0.3, 4096, 0.98),
        };
        GenerationParams {
            temperature,
            max_tokens,
            top_p,
            ..GenerationParams::default()
        }
    }
}

/// One orchestration request.
#[derive(Debug, Clone)]
pub struct OrchestrationRequest {
    pub business_task: String,
    /// Target identifier from the closed set.
    pub target_lm: String,
    pub dataset: Dataset,
    pub quality_profile: QualityProfile,
    /// `None` selects the strategy automatically.
    pub optimizer_strategy: Option<OptimizerKind>,
    /// Success requires the compiled metric to reach this value.
    pub metric_threshold: f64,
    pub max_iterations: u32,
    pub max_wall_time: Duration,
    pub split_ratios: SplitRatios,
    pub split_seed: u64,
}

impl OrchestrationRequest {
    pub fn new(
        business_task: impl Into<String>,
        target_lm: impl Into<String>,
        dataset: Dataset,
    ) -> Self {
        Self {
            business_task: business_task.into(),
            target_lm: target_lm.into(),
            dataset,
            quality_profile: QualityProfile::Balanced,
            optimizer_strategy: None,
            metric_threshold: 0.7,
            max_iterations: 20,
            max_wall_time: Duration::from_secs(300),
            split_ratios: SplitRatios::default(),
            split_seed: 42,
        }
    }
}

/// Terminal state of an orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    Success,
    BudgetExhausted,
    Failed,
}

/// A classified terminal error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationError {
    pub error_type: ErrorType,
    pub message: String,
}

/// Everything an orchestration returns, successful or not.
#[derive(Debug)]
pub struct OrchestrationOutcome {
    pub success: bool,
    pub status: OrchestrationStatus,
    pub artifact_id: Option<String>,
    pub program_code: String,
    pub task_analysis: Option<TaskAnalysis>,
    pub eval_results: Option<EvaluationRun>,
    pub steps: Vec<StepEvent>,
    pub total_cost: f64,
    pub iteration_count: u32,
    pub error: Option<OrchestrationError>,
}

/// The agent. Holds the process-scoped services; each `orchestrate` call
/// runs an independent session.
pub struct Orchestrator {
    config: StudioConfig,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    store: Arc<HistoryStore>,
    provider_override: Option<Arc<dyn crate::provider::LmProvider>>,
}

impl Orchestrator {
    pub fn new(
        config: StudioConfig,
        cache: Arc<ResponseCache>,
        limiter: Arc<RateLimiter>,
        store: Arc<HistoryStore>,
    ) -> Self {
        Self {
            config,
            cache,
            limiter,
            store,
            provider_override: None,
        }
    }

    /// Bind a custom backend for every target this orchestrator registers,
    /// bypassing the configuration lookup.
    pub fn with_provider(mut self, provider: Arc<dyn crate::provider::LmProvider>) -> Self {
        self.provider_override = Some(provider);
        self
    }

    /// Run one orchestration without step streaming.
    pub async fn orchestrate(&self, request: OrchestrationRequest) -> OrchestrationOutcome {
        self.orchestrate_with_events(request, None).await
    }

    /// Run one orchestration, publishing step events to `sink`.
    pub async fn orchestrate_with_events(
        &self,
        request: OrchestrationRequest,
        sink: Option<StepSink>,
    ) -> OrchestrationOutcome {
        let context = ToolContext {
            config: self.config.clone(),
            cache: Arc::clone(&self.cache),
            limiter: Arc::clone(&self.limiter),
            store: Arc::clone(&self.store),
            cancel: CancelFlag::new(),
            provider_override: self.provider_override.clone(),
        };
        let mut recorder = StepRecorder::new(sink);
        // The target is validated by register_target_lm; the placeholder
        // only seeds the session record.
        let mut session = SessionState::new(
            request.business_task.clone(),
            TargetLm::LocalStub,
            request.dataset.clone(),
        );
        let started = Instant::now();

        let result = self
            .drive(&context, &mut session, &mut recorder, &request, started)
            .await;

        let total_cost = session
            .client
            .as_ref()
            .map(|c| c.total_cost())
            .unwrap_or(0.0);
        let program_code = session.program_code.clone().unwrap_or_default();

        match result {
            Ok((status, artifact_id)) => OrchestrationOutcome {
                success: status == OrchestrationStatus::Success,
                status,
                artifact_id,
                program_code,
                task_analysis: session.task_analysis,
                eval_results: session.eval_results,
                steps: recorder.into_steps(),
                total_cost,
                iteration_count: session.iteration_count,
                error: None,
            },
            Err(error) => {
                let classified = classify_terminal_error(&error);
                log_warn!(
                    error_type = ?classified.error_type,
                    message = %classified.message,
                    "Orchestration failed"
                );
                OrchestrationOutcome {
                    success: false,
                    status: OrchestrationStatus::Failed,
                    artifact_id: None,
                    program_code,
                    task_analysis: session.task_analysis,
                    eval_results: session.eval_results,
                    steps: recorder.into_steps(),
                    total_cost,
                    iteration_count: session.iteration_count,
                    error: Some(classified),
                }
            }
        }
    }

    /// The phase state machine. Returns the terminal status and, on
    /// success, the logged artifact id.
    async fn drive(
        &self,
        context: &ToolContext,
        session: &mut SessionState,
        recorder: &mut StepRecorder,
        request: &OrchestrationRequest,
        started: Instant,
    ) -> StudioResult<(OrchestrationStatus, Option<String>)> {
        // Phases 1-4: strictly linear setup.
        self.step(context, session, recorder, "validate dataset", ToolCall::ValidateDataset)
            .await?;
        self.step(
            context,
            session,
            recorder,
            "analyze business goal",
            ToolCall::AnalyzeBusinessGoal,
        )
        .await?;
        self.step(
            context,
            session,
            recorder,
            "register target LM",
            ToolCall::RegisterTargetLm {
                name: request.target_lm.clone(),
            },
        )
        .await?;
        self.step(
            context,
            session,
            recorder,
            "configure LM profile",
            ToolCall::ConfigureLmProfile {
                profile: request.quality_profile,
            },
        )
        .await?;
        self.step(
            context,
            session,
            recorder,
            "define contract signature",
            ToolCall::DefineContractSignature,
        )
        .await?;
        self.step(
            context,
            session,
            recorder,
            "assemble program pipeline",
            ToolCall::AssembleProgramPipeline,
        )
        .await?;
        self.step(
            context,
            session,
            recorder,
            "finalize program assembly",
            ToolCall::FinalizeProgramAssembly,
        )
        .await?;
        self.step(context, session, recorder, "load eval data", ToolCall::LoadEvalData)
            .await?;
        self.step(
            context,
            session,
            recorder,
            "prepare eval splits",
            ToolCall::PrepareEvalSplits {
                ratios: request.split_ratios,
                seed: request.split_seed,
            },
        )
        .await?;
        self.step(
            context,
            session,
            recorder,
            "set evaluation metric",
            ToolCall::SetEvaluationMetric,
        )
        .await?;

        let strategy = self
            .step(
                context,
                session,
                recorder,
                "select compiler strategy",
                ToolCall::SelectCompilerStrategy {
                    profile: request.quality_profile,
                },
            )
            .await?;
        let (mut optimizer, params) = match strategy {
            ToolOutput::StrategySelected { optimizer, params } => (optimizer, params),
            _ => (OptimizerKind::BootstrapFewShot, BTreeMap::new()),
        };
        if let Some(requested) = request.optimizer_strategy {
            optimizer = requested;
        }
        let metric_name = session
            .metric_name
            .clone()
            .unwrap_or_else(|| "exact_match".to_string());
        self.step(
            context,
            session,
            recorder,
            "configure compiler",
            ToolCall::ConfigureCompiler {
                optimizer,
                params,
                metric_name,
            },
        )
        .await?;

        // Phases 5-6: compile, observe, correct.
        loop {
            if session.iteration_count >= request.max_iterations {
                log_info!(
                    iterations = session.iteration_count,
                    "Iteration budget exhausted"
                );
                session.iteration_count = request.max_iterations;
                return Ok((OrchestrationStatus::BudgetExhausted, None));
            }
            if started.elapsed() >= request.max_wall_time {
                log_info!(elapsed_s = started.elapsed().as_secs(), "Wall-clock budget exhausted");
                return Ok((OrchestrationStatus::BudgetExhausted, None));
            }

            let outcome = self
                .step(context, session, recorder, "run compilation", ToolCall::RunCompilation)
                .await?;
            let (success, metric_value, error_log) = match outcome {
                ToolOutput::CompilationFinished {
                    success,
                    metric_value,
                    error_log,
                } => (success, metric_value, error_log),
                _ => (false, None, Some("unexpected tool output".to_string())),
            };

            if success {
                let measured = metric_value.unwrap_or(0.0);
                if measured >= request.metric_threshold {
                    let logged = self
                        .step(context, session, recorder, "log artifacts", ToolCall::LogArtifacts)
                        .await?;
                    let artifact_id = match logged {
                        ToolOutput::ArtifactsLogged { artifact_id } => Some(artifact_id),
                        _ => None,
                    };
                    return Ok((OrchestrationStatus::Success, artifact_id));
                }
                // Compiled but short of the bar: treat as a low-metric
                // observation and keep iterating.
                let observation = format!(
                    "low metric: {measured:.4} below threshold {:.4}",
                    request.metric_threshold
                );
                if !self
                    .correct(context, session, recorder, &observation)
                    .await?
                {
                    return Ok((OrchestrationStatus::Failed, None));
                }
                continue;
            }

            let log = error_log.unwrap_or_else(|| "optimizer failure".to_string());
            if !self.correct(context, session, recorder, &log).await? {
                return Ok((OrchestrationStatus::Failed, None));
            }
        }
    }

    /// Phase 6: classify the failure, plan fixes, apply the best one.
    /// Returns false when no fix applies (terminal).
    async fn correct(
        &self,
        context: &ToolContext,
        session: &mut SessionState,
        recorder: &mut StepRecorder,
        error_log: &str,
    ) -> StudioResult<bool> {
        let analyzed = self
            .step(
                context,
                session,
                recorder,
                "analyze failure",
                ToolCall::AnalyzeFailure {
                    error_log: error_log.to_string(),
                },
            )
            .await?;
        let failure = match analyzed {
            ToolOutput::FailureAnalyzed(f) => f,
            _ => return Ok(false),
        };

        if failure.severity == FailureSeverity::Critical {
            return Ok(false);
        }

        let planned = self
            .step(
                context,
                session,
                recorder,
                "propose pipeline fix",
                ToolCall::ProposePipelineFix,
            )
            .await?;
        let plan = match planned {
            ToolOutput::FixPlanned { plan } => plan,
            _ => Vec::new(),
        };
        let Some(fix) = plan.first() else {
            return Ok(false);
        };

        match fix.action {
            FixAction::FixSignature => {
                let field = fix
                    .parameters
                    .get("add_input_field")
                    .and_then(|v| v.as_str())
                    .unwrap_or("context")
                    .to_string();
                if let Some(current) = session.current_signature() {
                    let repaired = current.with_input_field(FieldSpec::optional(
                        field.clone(),
                        SemanticType::ListString,
                        format!("the {field} supplied with each example"),
                    ));
                    session.adopt_signature(repaired);
                }
                if let Some(spec) = session.current_spec.as_mut() {
                    if !spec.dataset_fields.iter().any(|f| f == &field) {
                        spec.dataset_fields.push(field);
                    }
                }
                self.step(
                    context,
                    session,
                    recorder,
                    "re-finalize program assembly",
                    ToolCall::FinalizeProgramAssembly,
                )
                .await?;
            }
            FixAction::AddTactic => {
                let anchor = session
                    .current_spec
                    .as_ref()
                    .and_then(|s| s.index_of("MainPredictor").map(|_| "MainPredictor".to_string()));
                let (position, anchor) = match anchor {
                    Some(a) => (TacticPosition::Replace, Some(a)),
                    None => (TacticPosition::Append, None),
                };
                self.step(
                    context,
                    session,
                    recorder,
                    "add tactic to program",
                    ToolCall::AddTacticToProgram {
                        tactic: ModuleKind::ChainOfThought,
                        position,
                        anchor,
                        params: BTreeMap::new(),
                    },
                )
                .await?;
                self.step(
                    context,
                    session,
                    recorder,
                    "re-finalize program assembly",
                    ToolCall::FinalizeProgramAssembly,
                )
                .await?;
            }
            FixAction::AdjustOptimizer => {
                let mode = fix
                    .parameters
                    .get("mode")
                    .and_then(|v| v.as_str())
                    .unwrap_or("retry_same");
                if let Some(compiler) = session.compiler.as_mut() {
                    match mode {
                        "widen_search" => {
                            let current = compiler
                                .params
                                .get("num_candidates")
                                .and_then(serde_json::Value::as_u64)
                                .unwrap_or(8);
                            compiler.params.insert(
                                "num_candidates".to_string(),
                                serde_json::json!(current * 2),
                            );
                        }
                        "fallback_bootstrap" => {
                            compiler.optimizer = OptimizerKind::BootstrapFewShot;
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(true)
    }

    /// Execute one tool, timing it and recording the step.
    async fn step(
        &self,
        context: &ToolContext,
        session: &mut SessionState,
        recorder: &mut StepRecorder,
        name: &str,
        call: ToolCall,
    ) -> StudioResult<ToolOutput> {
        let tool = call.name().to_string();
        let action = format!("{call:?}");
        let step_started = Instant::now();

        let result = dispatch(context, session, call).await;
        let duration_ms = step_started.elapsed().as_millis() as u64;

        match &result {
            Ok(output) => {
                recorder.record(
                    name,
                    Some(tool),
                    StepStatus::Success,
                    None,
                    Some(action),
                    Some(observation_of(output)),
                    duration_ms,
                    None,
                );
            }
            Err(error) => {
                recorder.record(
                    name,
                    Some(tool),
                    StepStatus::Error,
                    None,
                    Some(action),
                    None,
                    duration_ms,
                    Some(error.to_string()),
                );
            }
        }
        result
    }
}

/// Compact observation line for the step trace.
fn observation_of(output: &ToolOutput) -> String {
    match output {
        ToolOutput::Analysis(a) => format!("task_type={:?} complexity={:?}", a.task_type, a.complexity),
        ToolOutput::LmRegistered { provider, model } => format!("{provider}/{model}"),
        ToolOutput::ProfileConfigured {
            temperature,
            max_tokens,
            top_p,
        } => format!("t={temperature} max_tokens={max_tokens} top_p={top_p}"),
        ToolOutput::SignatureDefined { signature_id, summary } => {
            format!("{signature_id}: {summary}")
        }
        ToolOutput::PipelineAssembled { modules } => modules.join(" -> "),
        ToolOutput::TacticApplied { module } => format!("inserted {module}"),
        ToolOutput::ProgramFinalized { .. } => "assembly validated".to_string(),
        ToolOutput::DatasetValidated { examples } => format!("{examples} examples"),
        ToolOutput::EvalDataLoaded { examples, labeled } => {
            format!("{examples} examples, {labeled} labeled")
        }
        ToolOutput::SplitsPrepared { train, dev, test } => {
            format!("train={train} dev={dev} test={test}")
        }
        ToolOutput::MetricSet { metric } => metric.clone(),
        ToolOutput::StrategySelected { optimizer, .. } => optimizer.as_str().to_string(),
        ToolOutput::CompilerConfigured => "compiler bound".to_string(),
        ToolOutput::CompilationFinished {
            success,
            metric_value,
            error_log,
        } => match (success, metric_value, error_log) {
            (true, Some(v), _) => format!("success, metric={v:.4}"),
            (true, None, _) => "success".to_string(),
            (false, _, Some(log)) => format!("failure: {log}"),
            (false, _, None) => "failure".to_string(),
        },
        ToolOutput::EvaluationCompleted {
            metrics,
            errored_cases,
        } => format!("{} metrics, {errored_cases} errored cases", metrics.len()),
        ToolOutput::FailureAnalyzed(f) => {
            format!("{:?} severity={:?}", f.error_type, f.severity)
        }
        ToolOutput::FixPlanned { plan } => format!("{} fixes planned", plan.len()),
        ToolOutput::ArtifactsLogged { artifact_id } => artifact_id.clone(),
        ToolOutput::PackageExported { path } => path.display().to_string(),
    }
}

/// Map a hard tool error to the closed error-type set for the outcome.
fn classify_terminal_error(error: &StudioError) -> OrchestrationError {
    let error_type = match error {
        StudioError::UnknownTarget { .. } => ErrorType::InvalidFormat,
        StudioError::Validation { .. } | StudioError::DatasetSchema { .. } => {
            ErrorType::InvalidFormat
        }
        StudioError::ProgramSpec { .. } => ErrorType::SignatureMismatch,
        StudioError::Timeout { .. } => ErrorType::Timeout,
        StudioError::Optimizer { .. } => ErrorType::OptimizerFailure,
        _ => match error_kind(error) {
            "timeout" => ErrorType::Timeout,
            _ => ErrorType::RuntimeError,
        },
    };
    OrchestrationError {
        error_type,
        message: error.to_string(),
    }
}
