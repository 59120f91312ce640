//! The closed tool catalog.
//!
//! Nineteen tools, each a typed variant with a typed output. The planning
//! layer dispatches by variant, so it cannot name an unknown tool or pass a
//! payload of the wrong shape. Semantics are identical whether the catalog
//! is driven in-process (the default) or exposed over a tool-calling
//! protocol.

use super::analysis::{
    analyze_business_goal, analyze_failure, default_metric_for, propose_pipeline_fix,
    FailureAnalysis, FixStep, TaskAnalysis,
};
use super::assembly::{
    add_tactic_to_program, assemble_program_pipeline, define_contract_signature,
    finalize_program_assembly,
};
use super::compile::{
    run_compilation, select_compiler_strategy, CompileStatus, CompilerConfig, OptimizerKind,
};
use super::package::{export_deployment_package, PackageFormat};
use super::session::SessionState;
use super::QualityProfile;
use crate::cache::ResponseCache;
use crate::client::LmClient;
use crate::config::StudioConfig;
use crate::dataset::SplitRatios;
use crate::error::{StudioError, StudioResult};
use crate::eval::{CancelFlag, Evaluator};
use crate::program::{ModuleKind, TacticPosition};
use crate::prompt::Prompt;
use crate::ratelimit::RateLimiter;
use crate::store::HistoryStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared services a dispatch can reach.
pub struct ToolContext {
    pub config: StudioConfig,
    pub cache: Arc<ResponseCache>,
    pub limiter: Arc<RateLimiter>,
    pub store: Arc<HistoryStore>,
    pub cancel: CancelFlag,
    /// When set, `register_target_lm` binds this backend instead of
    /// building one from the configuration. Lets embedders supply custom
    /// providers (and tests supply scripted ones) without widening the
    /// target set.
    pub provider_override: Option<Arc<dyn crate::provider::LmProvider>>,
}

/// The closed set of tool invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    AnalyzeBusinessGoal,
    RegisterTargetLm {
        name: String,
    },
    ConfigureLmProfile {
        profile: QualityProfile,
    },
    DefineContractSignature,
    AssembleProgramPipeline,
    AddTacticToProgram {
        tactic: ModuleKind,
        position: TacticPosition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        params: BTreeMap<String, serde_json::Value>,
    },
    FinalizeProgramAssembly,
    ValidateDataset,
    LoadEvalData,
    PrepareEvalSplits {
        ratios: SplitRatios,
        seed: u64,
    },
    SetEvaluationMetric,
    SelectCompilerStrategy {
        profile: QualityProfile,
    },
    ConfigureCompiler {
        optimizer: OptimizerKind,
        params: BTreeMap<String, serde_json::Value>,
        metric_name: String,
    },
    RunCompilation,
    RunEvaluationSuite,
    AnalyzeFailure {
        error_log: String,
    },
    ProposePipelineFix,
    LogArtifacts,
    ExportDeploymentPackage {
        artifact_id: String,
        format: PackageFormat,
        out_dir: PathBuf,
    },
}

impl ToolCall {
    /// Stable tool name for step traces.
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::AnalyzeBusinessGoal => "analyze_business_goal",
            ToolCall::RegisterTargetLm { .. } => "register_target_lm",
            ToolCall::ConfigureLmProfile { .. } => "configure_lm_profile",
            ToolCall::DefineContractSignature => "define_contract_signature",
            ToolCall::AssembleProgramPipeline => "assemble_program_pipeline",
            ToolCall::AddTacticToProgram { .. } => "add_tactic_to_program",
            ToolCall::FinalizeProgramAssembly => "finalize_program_assembly",
            ToolCall::ValidateDataset => "validate_dataset",
            ToolCall::LoadEvalData => "load_eval_data",
            ToolCall::PrepareEvalSplits { .. } => "prepare_eval_splits",
            ToolCall::SetEvaluationMetric => "set_evaluation_metric",
            ToolCall::SelectCompilerStrategy { .. } => "select_compiler_strategy",
            ToolCall::ConfigureCompiler { .. } => "configure_compiler",
            ToolCall::RunCompilation => "run_compilation",
            ToolCall::RunEvaluationSuite => "run_evaluation_suite",
            ToolCall::AnalyzeFailure { .. } => "analyze_failure",
            ToolCall::ProposePipelineFix => "propose_pipeline_fix",
            ToolCall::LogArtifacts => "log_artifacts",
            ToolCall::ExportDeploymentPackage { .. } => "export_deployment_package",
        }
    }
}

/// Typed tool results, mirroring the call variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output", rename_all = "snake_case")]
pub enum ToolOutput {
    Analysis(TaskAnalysis),
    LmRegistered {
        provider: String,
        model: String,
    },
    ProfileConfigured {
        temperature: f64,
        max_tokens: u32,
        top_p: f64,
    },
    SignatureDefined {
        signature_id: String,
        summary: String,
    },
    PipelineAssembled {
        modules: Vec<String>,
    },
    TacticApplied {
        module: String,
    },
    ProgramFinalized {
        code: String,
    },
    DatasetValidated {
        examples: usize,
    },
    EvalDataLoaded {
        examples: usize,
        labeled: usize,
    },
    SplitsPrepared {
        train: usize,
        dev: usize,
        test: usize,
    },
    MetricSet {
        metric: String,
    },
    StrategySelected {
        optimizer: OptimizerKind,
        params: BTreeMap<String, serde_json::Value>,
    },
    CompilerConfigured,
    CompilationFinished {
        success: bool,
        metric_value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_log: Option<String>,
    },
    EvaluationCompleted {
        metrics: BTreeMap<String, f64>,
        errored_cases: usize,
    },
    FailureAnalyzed(FailureAnalysis),
    FixPlanned {
        plan: Vec<FixStep>,
    },
    ArtifactsLogged {
        artifact_id: String,
    },
    PackageExported {
        path: PathBuf,
    },
}

/// Execute one tool against the session. This is the single dispatch point
/// of the agent loop.
pub async fn dispatch(
    context: &ToolContext,
    session: &mut SessionState,
    call: ToolCall,
) -> StudioResult<ToolOutput> {
    match call {
        ToolCall::AnalyzeBusinessGoal => {
            let analysis = analyze_business_goal(&session.business_task);
            session.task_analysis = Some(analysis.clone());
            Ok(ToolOutput::Analysis(analysis))
        }

        ToolCall::RegisterTargetLm { name } => {
            let target = crate::config::TargetLm::parse(&name)?;
            session.target_lm = target;
            let binding = context.config.resolve_target(target)?.clone();
            let client = match &context.provider_override {
                Some(provider) => LmClient::new(
                    Arc::clone(provider),
                    Arc::clone(&context.cache),
                    Arc::clone(&context.limiter),
                    crate::internals::retry::RetryPolicy::default(),
                ),
                None => LmClient::for_target(
                    &context.config,
                    target,
                    Arc::clone(&context.cache),
                    Arc::clone(&context.limiter),
                )?,
            };
            session.client = Some(Arc::new(client));
            Ok(ToolOutput::LmRegistered {
                provider: binding.provider,
                model: binding.model,
            })
        }

        ToolCall::ConfigureLmProfile { profile } => {
            session.generation_params = profile.generation_params();
            Ok(ToolOutput::ProfileConfigured {
                temperature: session.generation_params.temperature,
                max_tokens: session.generation_params.max_tokens,
                top_p: session.generation_params.top_p,
            })
        }

        ToolCall::DefineContractSignature => {
            let analysis = require_analysis(session)?;
            let signature = define_contract_signature(analysis);
            let summary = signature.summary();
            let signature_id = session.adopt_signature(signature);
            Ok(ToolOutput::SignatureDefined {
                signature_id,
                summary,
            })
        }

        ToolCall::AssembleProgramPipeline => {
            let analysis = require_analysis(session)?.clone();
            let spec = assemble_program_pipeline(&analysis)?;
            let modules = spec.modules.iter().map(|m| m.name.clone()).collect();
            session.current_spec = Some(spec);
            session.program_finalized = false;
            Ok(ToolOutput::PipelineAssembled { modules })
        }

        ToolCall::AddTacticToProgram {
            tactic,
            position,
            anchor,
            params,
        } => {
            let spec = session
                .current_spec
                .as_mut()
                .ok_or_else(|| StudioError::program_spec("no pipeline assembled yet"))?;
            let index = add_tactic_to_program(spec, tactic, position, anchor.as_deref(), params)?;
            session.program_finalized = false;
            Ok(ToolOutput::TacticApplied {
                module: spec.modules[index].name.clone(),
            })
        }

        ToolCall::FinalizeProgramAssembly => {
            let signature_id = session
                .current_signature_id
                .clone()
                .ok_or_else(|| StudioError::program_spec("no contract signature defined"))?;
            let signatures = session.signatures.clone();
            let spec = session
                .current_spec
                .as_mut()
                .ok_or_else(|| StudioError::program_spec("no pipeline assembled yet"))?;
            let code = finalize_program_assembly(spec, &signature_id, &signatures)?;
            session.program_code = Some(code.clone());
            session.program_finalized = true;
            Ok(ToolOutput::ProgramFinalized { code })
        }

        ToolCall::ValidateDataset => {
            session.dataset.validate_for_compilation()?;
            Ok(ToolOutput::DatasetValidated {
                examples: session.dataset.len(),
            })
        }

        ToolCall::LoadEvalData => {
            session.dataset.validate()?;
            let labeled = session
                .dataset
                .examples
                .iter()
                .filter(|e| e.expected.is_some())
                .count();
            Ok(ToolOutput::EvalDataLoaded {
                examples: session.dataset.len(),
                labeled,
            })
        }

        ToolCall::PrepareEvalSplits { ratios, seed } => {
            let splits = session.dataset.split(seed, ratios)?;
            let output = ToolOutput::SplitsPrepared {
                train: splits.train.len(),
                dev: splits.dev.len(),
                test: splits.test.len(),
            };
            session.splits = Some(splits);
            Ok(output)
        }

        ToolCall::SetEvaluationMetric => {
            let analysis = require_analysis(session)?;
            let metric = default_metric_for(analysis.task_type).to_string();
            session.metric_name = Some(metric.clone());
            Ok(ToolOutput::MetricSet { metric })
        }

        ToolCall::SelectCompilerStrategy { profile } => {
            let analysis = require_analysis(session)?;
            let (optimizer, params) = select_compiler_strategy(
                analysis.task_type,
                analysis.complexity,
                session.dataset.len(),
                profile,
            );
            Ok(ToolOutput::StrategySelected { optimizer, params })
        }

        ToolCall::ConfigureCompiler {
            optimizer,
            params,
            metric_name,
        } => {
            session.compiler = Some(CompilerConfig {
                optimizer,
                params,
                metric_name,
            });
            Ok(ToolOutput::CompilerConfigured)
        }

        ToolCall::RunCompilation => {
            let evaluator = evaluator_for(session)?;
            session.iteration_count += 1;
            let outcome = run_compilation(session, &evaluator, &context.cancel).await?;
            let success = outcome.status == CompileStatus::Success;
            if success {
                session.compiled = outcome.compiled;
                session.eval_results = outcome.eval_results;
            }
            Ok(ToolOutput::CompilationFinished {
                success,
                metric_value: session
                    .compiled
                    .as_ref()
                    .filter(|_| success)
                    .map(|c| c.metric_value),
                error_log: outcome.error_log,
            })
        }

        ToolCall::RunEvaluationSuite => {
            let evaluator = evaluator_for(session)?;
            let compiled = session
                .compiled
                .as_ref()
                .ok_or_else(|| StudioError::validation("no compiled program to evaluate"))?;
            let prompt = Prompt::new(
                format!("{}-program", session.dataset.name),
                compiled_prompt_text(compiled),
            )?;
            let run = evaluator
                .evaluate(
                    &prompt,
                    &session.dataset,
                    &session.generation_params,
                    &context.cancel,
                )
                .await?;
            let output = ToolOutput::EvaluationCompleted {
                metrics: run.metrics.clone(),
                errored_cases: run.errored_cases,
            };
            session.eval_results = Some(run);
            Ok(output)
        }

        ToolCall::AnalyzeFailure { error_log } => {
            let analysis = analyze_failure(&error_log);
            session.error_history.push(analysis.clone());
            Ok(ToolOutput::FailureAnalyzed(analysis))
        }

        ToolCall::ProposePipelineFix => {
            let failure = session.last_failure().ok_or_else(|| {
                StudioError::validation("no failure recorded to plan fixes for")
            })?;
            Ok(ToolOutput::FixPlanned {
                plan: propose_pipeline_fix(failure),
            })
        }

        ToolCall::LogArtifacts => {
            let compiled = session
                .compiled
                .as_ref()
                .ok_or_else(|| StudioError::validation("no compiled program to log"))?;
            let prompt_id = format!("{}-program", session.dataset.name);

            let mut metadata = BTreeMap::new();
            if let Some(analysis) = &session.task_analysis {
                metadata.insert(
                    "task_analysis".to_string(),
                    serde_json::to_value(analysis).unwrap_or(serde_json::Value::Null),
                );
            }
            metadata.insert(
                "business_task".to_string(),
                serde_json::Value::String(session.business_task.clone()),
            );
            if let Some(client) = &session.client {
                metadata.insert(
                    "total_cost".to_string(),
                    serde_json::json!(client.total_cost()),
                );
            }

            if let Some(run) = &session.eval_results {
                context.store.save_evaluation(run)?;
            }
            let artifact_id = context.store.save_artifact(
                &prompt_id,
                compiled,
                session.eval_results.as_ref(),
                metadata,
            )?;
            Ok(ToolOutput::ArtifactsLogged { artifact_id })
        }

        ToolCall::ExportDeploymentPackage {
            artifact_id,
            format,
            out_dir,
        } => {
            let path = export_deployment_package(&context.store, &artifact_id, &out_dir, format)?;
            Ok(ToolOutput::PackageExported { path })
        }
    }
}

fn require_analysis(session: &SessionState) -> StudioResult<&TaskAnalysis> {
    session
        .task_analysis
        .as_ref()
        .ok_or_else(|| StudioError::validation("business goal has not been analyzed yet"))
}

fn evaluator_for(session: &SessionState) -> StudioResult<Evaluator> {
    let client = session
        .client
        .as_ref()
        .ok_or_else(|| StudioError::validation("no target LM registered"))?;
    let metric = session
        .metric_name
        .clone()
        .unwrap_or_else(|| "exact_match".to_string());
    Ok(Evaluator::new(Arc::clone(client))
        .with_primary_metric(metric)
        .with_parallelism(4))
}

/// The prompt a compiled program evaluates and ships with: instruction plus
/// selected demonstrations.
pub fn compiled_prompt_text(compiled: &crate::program::CompiledProgram) -> String {
    let instruction = compiled
        .signatures
        .values()
        .next()
        .map(|s| s.instruction.clone())
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| "Complete the task for the given input.".to_string());

    let mut text = instruction;
    for demo in &compiled.demonstrations {
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
