//! Task and failure analysis.
//!
//! Both analyses are deterministic keyword heuristics over the inputs. The
//! output schemas are fixed; swapping the heuristics for a planning LM call
//! would not change any caller.

use crate::logging::log_debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Task families the studio can assemble programs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Rag,
    Classification,
    Extraction,
    Summarization,
    Reasoning,
    Routing,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Low,
    Standard,
    High,
}

/// Structured reading of a business task description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub task_type: TaskType,
    pub domain: String,
    pub input_roles: Vec<String>,
    pub output_roles: Vec<String>,
    pub needs_retrieval: bool,
    pub needs_chain_of_thought: bool,
    pub needs_tool_use: bool,
    pub complexity: Complexity,
    pub safety_level: SafetyLevel,
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

/// Read the task type, roles, and flags out of a free-text business goal.
pub fn analyze_business_goal(text: &str) -> TaskAnalysis {
    let lowered = text.to_lowercase();

    let needs_retrieval = contains_any(
        &lowered,
        &["knowledge base", "documents", "retriev", "search over", "corpus", "faq"],
    );
    let task_type = if needs_retrieval
        && contains_any(&lowered, &["answer", "question", "support", "assist"])
    {
        TaskType::Rag
    } else if contains_any(&lowered, &["classif", "categor", "label", "triage", "sentiment"]) {
        TaskType::Classification
    } else if contains_any(&lowered, &["extract", "parse out", "pull out", "fields from"]) {
        TaskType::Extraction
    } else if contains_any(&lowered, &["summar", "tl;dr", "condense", "digest"]) {
        TaskType::Summarization
    } else if contains_any(&lowered, &["route", "routing", "dispatch", "forward to"]) {
        TaskType::Routing
    } else if contains_any(&lowered, &["reason", "solve", "math", "multi-step", "logic", "prove"])
    {
        TaskType::Reasoning
    } else if needs_retrieval {
        TaskType::Rag
    } else {
        TaskType::Hybrid
    };

    let domain = ["legal", "medical", "finance", "support", "retail", "engineering"]
        .iter()
        .find(|d| lowered.contains(*d))
        .map_or_else(|| "general".to_string(), |d| (*d).to_string());

    let needs_chain_of_thought = matches!(task_type, TaskType::Reasoning)
        || contains_any(&lowered, &["step by step", "explain", "justify", "why"]);
    let needs_tool_use = contains_any(&lowered, &["api", "calculator", "tool", "database"]);

    let word_count = lowered.split_whitespace().count();
    let complexity = if matches!(task_type, TaskType::Reasoning | TaskType::Hybrid)
        || needs_tool_use
        || word_count > 60
    {
        Complexity::High
    } else if matches!(task_type, TaskType::Rag | TaskType::Summarization) || word_count > 25 {
        Complexity::Medium
    } else {
        Complexity::Low
    };

    let safety_level = if contains_any(&lowered, &["medical", "legal", "financial advice", "safety"])
    {
        SafetyLevel::High
    } else if contains_any(&lowered, &["customer", "public", "production"]) {
        SafetyLevel::Standard
    } else {
        SafetyLevel::Low
    };

    let mut input_roles = vec!["input".to_string()];
    if needs_retrieval {
        input_roles.push("context".to_string());
    }
    let output_roles = match task_type {
        TaskType::Classification | TaskType::Routing => vec!["label".to_string()],
        TaskType::Extraction => vec!["fields".to_string()],
        TaskType::Reasoning => vec!["reasoning".to_string(), "answer".to_string()],
        _ => vec!["answer".to_string()],
    };

    let analysis = TaskAnalysis {
        task_type,
        domain,
        input_roles,
        output_roles,
        needs_retrieval,
        needs_chain_of_thought,
        needs_tool_use,
        complexity,
        safety_level,
    };
    log_debug!(task_type = ?analysis.task_type, complexity = ?analysis.complexity, "Business goal analyzed");
    analysis
}

/// Default evaluation metric per task type.
pub fn default_metric_for(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Classification | TaskType::Routing => "accuracy",
        TaskType::Extraction => "exact_match",
        TaskType::Summarization => "rouge_l",
        TaskType::Reasoning => "llm_judge",
        TaskType::Rag => "semantic_f1",
        TaskType::Hybrid => "exact_match",
    }
}

// =============================================================================
// Failure analysis
// =============================================================================

/// The closed set of failure classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    SignatureMismatch,
    MissingField,
    InvalidFormat,
    OptimizerFailure,
    LowMetric,
    RuntimeError,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// One classified failure, appended to the session's error history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub error_type: ErrorType,
    pub severity: FailureSeverity,
    pub root_cause: String,
    pub suggested_fix: String,
}

/// Classify a compilation error log.
pub fn analyze_failure(error_log: &str) -> FailureAnalysis {
    let lowered = error_log.to_lowercase();

    let (error_type, severity, suggested_fix) = if lowered.contains("missing_field")
        || lowered.contains("dataset provides")
    {
        (
            ErrorType::MissingField,
            FailureSeverity::Medium,
            "add the missing field to the contract signature".to_string(),
        )
    } else if lowered.contains("signature") || lowered.contains("unbound") {
        (
            ErrorType::SignatureMismatch,
            FailureSeverity::Medium,
            "align the signature with the program's wiring".to_string(),
        )
    } else if lowered.contains("unknown target") || lowered.contains("invalid_format") {
        (
            ErrorType::InvalidFormat,
            FailureSeverity::Critical,
            "use a target identifier from the supported set".to_string(),
        )
    } else if lowered.contains("timed out") || lowered.contains("timeout") {
        (
            ErrorType::Timeout,
            FailureSeverity::Medium,
            "reduce candidate count or raise the time budget".to_string(),
        )
    } else if lowered.contains("below threshold") || lowered.contains("low metric") {
        (
            ErrorType::LowMetric,
            FailureSeverity::Low,
            "add reasoning tactics or widen the optimizer search".to_string(),
        )
    } else if lowered.contains("optimizer") || lowered.contains("no viable candidate") {
        (
            ErrorType::OptimizerFailure,
            FailureSeverity::High,
            "switch optimizer strategy or relax its parameters".to_string(),
        )
    } else {
        (
            ErrorType::RuntimeError,
            FailureSeverity::High,
            "inspect the error log and retry compilation".to_string(),
        )
    };

    FailureAnalysis {
        error_type,
        severity,
        root_cause: error_log.chars().take(300).collect(),
        suggested_fix,
    }
}

/// Repair actions the loop can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixAction {
    FixSignature,
    AddTactic,
    AdjustOptimizer,
}

/// One prioritized entry of a fix plan. Lower priority value runs first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixStep {
    pub action: FixAction,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub priority: u8,
}

/// Derive a prioritized fix plan from a classified failure.
pub fn propose_pipeline_fix(analysis: &FailureAnalysis) -> Vec<FixStep> {
    let mut plan = Vec::new();
    let param = |key: &str, value: &str| {
        let mut map = BTreeMap::new();
        map.insert(
            key.to_string(),
            serde_json::Value::String(value.to_string()),
        );
        map
    };

    match analysis.error_type {
        ErrorType::MissingField => {
            plan.push(FixStep {
                action: FixAction::FixSignature,
                parameters: param("add_input_field", "context"),
                priority: 1,
            });
        }
        ErrorType::SignatureMismatch => {
            plan.push(FixStep {
                action: FixAction::FixSignature,
                parameters: param("mode", "rebuild_from_roles"),
                priority: 1,
            });
        }
        ErrorType::LowMetric => {
            plan.push(FixStep {
                action: FixAction::AddTactic,
                parameters: param("tactic", "chain_of_thought"),
                priority: 1,
            });
            plan.push(FixStep {
                action: FixAction::AdjustOptimizer,
                parameters: param("mode", "widen_search"),
                priority: 2,
            });
        }
        ErrorType::OptimizerFailure | ErrorType::Timeout => {
            plan.push(FixStep {
                action: FixAction::AdjustOptimizer,
                parameters: param("mode", "fallback_bootstrap"),
                priority: 1,
            });
        }
        ErrorType::RuntimeError => {
            plan.push(FixStep {
                action: FixAction::AdjustOptimizer,
                parameters: param("mode", "retry_same"),
                priority: 1,
            });
        }
        // No applicable fix: the loop terminates on critical severity.
        ErrorType::InvalidFormat => {}
    }

    plan.sort_by_key(|step| step.priority);
    plan
}
