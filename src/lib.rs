//! # prompt-studio
//!
//! A local-first workbench core that turns an informal task description
//! plus a small evaluation dataset into a measurable, versioned, deployable
//! LLM prompt artifact.
//!
//! ## Subsystems
//!
//! - **Orchestrator** ([`orchestrator`]): an autonomous agent that plans and
//!   compiles a multi-module LM program against a dataset, self-corrects on
//!   failure, and emits a reproducible artifact.
//! - **Evaluation engine** ([`eval`]): reference-based, consistency, and
//!   robustness scoring over dataset x prompt matrices, with per-case and
//!   aggregate views.
//! - **Artifact & history store** ([`store`]): an append-only record of
//!   evaluation runs and compiled programs with regression and trend
//!   queries, and rollback.
//! - **Provider abstraction** ([`provider`], [`client`]): one capability
//!   interface over local and cloud LM backends, mediated by a two-tier
//!   response cache, a sliding-window rate limiter, and retry with backoff.
//!
//! ## Example
//!
//! ```rust,no_run
//! use prompt_studio::{
//!     CancelFlag, Dataset, Evaluator, Example, GenerationParams, LmClient, Prompt,
//!     RateLimiter, ResponseCache, RetryPolicy, StubProvider,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> prompt_studio::StudioResult<()> {
//! let provider = Arc::new(StubProvider::fixed("stub-v1", "4"));
//! let client = Arc::new(LmClient::new(
//!     provider,
//!     Arc::new(ResponseCache::memory_only(1024, 3600)),
//!     Arc::new(RateLimiter::new(60)),
//!     RetryPolicy::default(),
//! ));
//!
//! let dataset = Dataset::new("arith", vec![Example::labeled("2+2=?", "4")]);
//! let prompt = Prompt::new("p1", "Compute the answer: {input}")?;
//!
//! let run = Evaluator::new(client)
//!     .evaluate(&prompt, &dataset, &GenerationParams::default(), &CancelFlag::new())
//!     .await?;
//! assert_eq!(run.metrics["exact_match"], 1.0);
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module declarations
// =============================================================================

pub mod cache;
pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod metrics;
pub mod mutators;
pub mod orchestrator;
pub mod program;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod ratelimit;
pub mod signature;
pub mod store;

// Internal modules
pub(crate) mod internals;
pub(crate) mod logging;

#[cfg(test)]
pub mod tests;

// =============================================================================
// Public API re-exports
// =============================================================================

// Errors
pub use error::{ErrorCategory, ErrorSeverity, StudioError, StudioResult};

// Configuration
pub use config::{
    CacheConfig, LoggingConfig, ModelBinding, Pricing, ProviderEntry, RateLimitConfig,
    StudioConfig, TargetLm,
};

// Logging init
pub use logging::init_logging;

// Data model
pub use dataset::{
    ContextValue, Dataset, DatasetSplits, Example, ExampleInput, IdealOutput, SplitRatios,
};
pub use prompt::{Prompt, PromptStatus};
pub use signature::{FieldSpec, SemanticType, Signature};
pub use program::{CompiledProgram, Edge, ModuleKind, ModuleNode, ProgramSpec, TacticPosition};

// Provider layer
pub use client::LmClient;
pub use provider::{ChatMessage, ChatRole, GenerationParams, LmProvider, LmResponse, TokenUsage};
pub use providers::{AnthropicProvider, OllamaProvider, OpenAiProvider, StubProvider};

// Mediation services
pub use cache::{cache_key, CacheEntry, ResponseCache};
pub use internals::retry::RetryPolicy;
pub use internals::tokens::{counter_for, TokenCounter};
pub use ratelimit::RateLimiter;

// Metric kernel
pub use metrics::{
    cosine_similarity, summarize, Embedder, JudgeCriterion, JudgeVerdict, LlmJudge,
    LogprobBackend, MetricRegistry, MutualJudgement, Scorer, Summary,
};

// Mutators
pub use mutators::{FormatMutator, NoiseLevel};

// Evaluation engine
pub use eval::{
    error_kind, CancelFlag, CaseResult, ConsistencyReport, EvaluationRun, Evaluator, FullReport,
    MutualConsistencyReport, ReportDepth, RunMetadata,
};

// Store
pub use store::{
    ArtifactIndexEntry, HistoryStore, RegressionReport, RegressionSeverity, RunIndexEntry,
    TrendDirection, TrendReport,
};

// Orchestrator
pub use orchestrator::{
    ErrorType, OptimizerKind, OrchestrationError, OrchestrationOutcome, OrchestrationRequest,
    OrchestrationStatus, Orchestrator, PackageFormat, QualityProfile, StepEvent, StepSink,
    StepStatus, TaskAnalysis, TaskType,
};
