//! Transient per-orchestration state.
//!
//! A session exists only for the duration of one `orchestrate` call. It is
//! the single mutable record the explicit state machine threads through its
//! tool dispatches; nothing in here outlives the call except what gets
//! persisted to the store at the end.

use super::analysis::{FailureAnalysis, TaskAnalysis};
use super::compile::CompilerConfig;
use crate::config::TargetLm;
use crate::client::LmClient;
use crate::dataset::{Dataset, DatasetSplits};
use crate::eval::EvaluationRun;
use crate::program::{CompiledProgram, ProgramSpec};
use crate::provider::GenerationParams;
use crate::signature::Signature;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything one orchestration accumulates as it runs.
pub struct SessionState {
    pub business_task: String,
    pub target_lm: TargetLm,
    pub dataset: Dataset,

    pub task_analysis: Option<TaskAnalysis>,
    /// The bound client, once phase 2 ran.
    pub client: Option<Arc<LmClient>>,
    pub generation_params: GenerationParams,

    /// Signatures built during this session, by content id.
    pub signatures: BTreeMap<String, Signature>,
    pub current_signature_id: Option<String>,
    pub current_spec: Option<ProgramSpec>,
    pub program_finalized: bool,
    /// Rendered code of the finalized assembly.
    pub program_code: Option<String>,

    pub splits: Option<DatasetSplits>,
    pub metric_name: Option<String>,
    pub compiler: Option<CompilerConfig>,

    pub eval_results: Option<EvaluationRun>,
    pub compiled: Option<CompiledProgram>,

    pub iteration_count: u32,
    pub error_history: Vec<FailureAnalysis>,
}

impl SessionState {
    pub fn new(business_task: String, target_lm: TargetLm, dataset: Dataset) -> Self {
        Self {
            business_task,
            target_lm,
            dataset,
            task_analysis: None,
            client: None,
            generation_params: GenerationParams::default(),
            signatures: BTreeMap::new(),
            current_signature_id: None,
            current_spec: None,
            program_finalized: false,
            program_code: None,
            splits: None,
            metric_name: None,
            compiler: None,
            eval_results: None,
            compiled: None,
            iteration_count: 0,
            error_history: Vec::new(),
        }
    }

    /// The latest classified failure, if any.
    pub fn last_failure(&self) -> Option<&FailureAnalysis> {
        self.error_history.last()
    }

    /// Register a signature and make it current.
    pub fn adopt_signature(&mut self, signature: Signature) -> String {
        let id = signature.content_id();
        self.signatures.insert(id.clone(), signature);
        self.current_signature_id = Some(id.clone());
        id
    }

    /// The current signature, when one was adopted.
    pub fn current_signature(&self) -> Option<&Signature> {
        self.current_signature_id
            .as_ref()
            .and_then(|id| self.signatures.get(id))
    }
}
