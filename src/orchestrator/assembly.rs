//! Signature and program assembly.
//!
//! Phase 3 of the pipeline: turn a task analysis into a contract signature
//! and a starter program spec, apply tactics, and finalize the DAG into
//! renderable form.

use super::analysis::{SafetyLevel, TaskAnalysis, TaskType};
use crate::error::{StudioError, StudioResult};
use crate::logging::log_debug;
use crate::program::{ModuleKind, ModuleNode, ProgramSpec, TacticPosition};
use crate::signature::{FieldSpec, SemanticType, Signature};
use std::collections::BTreeMap;

fn semantic_type_for_role(role: &str, output: bool) -> SemanticType {
    match role {
        "context" => SemanticType::ListString,
        "label" => SemanticType::Label,
        "fields" => SemanticType::Json,
        "score" => SemanticType::Score,
        "reasoning" => SemanticType::Text,
        _ if output => SemanticType::Text,
        _ => SemanticType::Text,
    }
}

/// Build the contract signature from analyzed roles.
pub fn define_contract_signature(analysis: &TaskAnalysis) -> Signature {
    let inputs = analysis
        .input_roles
        .iter()
        .map(|role| {
            FieldSpec::required(
                role.clone(),
                semantic_type_for_role(role, false),
                format!("the {role} of one task instance"),
            )
        })
        .collect();
    let outputs = analysis
        .output_roles
        .iter()
        .map(|role| {
            FieldSpec::required(
                role.clone(),
                semantic_type_for_role(role, true),
                format!("the produced {role}"),
            )
        })
        .collect();

    let instruction = match analysis.task_type {
        TaskType::Classification => format!(
            "Classify the {} input into the correct label.",
            analysis.domain
        ),
        TaskType::Extraction => format!(
            "Extract the requested fields from the {} input.",
            analysis.domain
        ),
        TaskType::Summarization => {
            format!("Summarize the {} input faithfully and concisely.", analysis.domain)
        }
        TaskType::Reasoning => {
            "Think through the problem carefully, then give the final answer.".to_string()
        }
        TaskType::Routing => "Choose the correct destination for the input.".to_string(),
        TaskType::Rag => {
            "Answer the question using only the provided context.".to_string()
        }
        TaskType::Hybrid => format!("Complete the {} task for the given input.", analysis.domain),
    };

    Signature::new(inputs, outputs).with_instruction(instruction)
}

/// Emit the starter program spec for an analyzed task.
///
/// RAG gets a retriever feeding the main predictor; reasoning (and any task
/// flagged for chain of thought) gets a ChainOfThought module; high safety
/// wraps the pipeline in a Retry stage; everything else starts as a bare
/// Predict.
pub fn assemble_program_pipeline(analysis: &TaskAnalysis) -> StudioResult<ProgramSpec> {
    let mut spec = ProgramSpec::new(vec!["input".to_string()]);

    if analysis.needs_retrieval || analysis.task_type == TaskType::Rag {
        let retriever = spec.add_module(
            ModuleNode::new("Retriever", ModuleKind::Retrieve)
                .with_param("k", serde_json::json!(4)),
        )?;
        let mut main = ModuleNode::new("MainPredictor", ModuleKind::Predict);
        main.inputs = vec!["input".to_string(), "context".to_string()];
        let main_idx = spec.add_module(main)?;
        spec.connect(retriever, "context", main_idx, "context")?;
    } else if analysis.task_type == TaskType::Reasoning || analysis.needs_chain_of_thought {
        spec.add_module(ModuleNode::new("MainPredictor", ModuleKind::ChainOfThought))?;
    } else {
        spec.add_module(ModuleNode::new("MainPredictor", ModuleKind::Predict))?;
    }

    if analysis.safety_level == SafetyLevel::High {
        spec.apply_tactic(
            ModuleNode::new("OutputGuard", ModuleKind::Retry)
                .with_param("max_retries", serde_json::json!(2)),
            TacticPosition::Append,
            None,
        )?;
    }

    log_debug!(modules = spec.modules.len(), "Starter pipeline assembled");
    Ok(spec)
}

/// Insert, replace, or append one tactic module.
pub fn add_tactic_to_program(
    spec: &mut ProgramSpec,
    tactic: ModuleKind,
    position: TacticPosition,
    anchor: Option<&str>,
    params: BTreeMap<String, serde_json::Value>,
) -> StudioResult<usize> {
    let name = unique_module_name(spec, tactic);
    let mut module = ModuleNode::new(name, tactic);
    module.params = params;
    spec.apply_tactic(module, position, anchor)
}

fn unique_module_name(spec: &ProgramSpec, kind: ModuleKind) -> String {
    let base = format!("{kind:?}");
    let mut candidate = base.clone();
    let mut counter = 2;
    while spec.index_of(&candidate).is_some() {
        candidate = format!("{base}{counter}");
        counter += 1;
    }
    candidate
}

/// Validate the DAG, bind the signature to its predict modules, and render
/// the executable form.
pub fn finalize_program_assembly(
    spec: &mut ProgramSpec,
    signature_id: &str,
    signatures: &BTreeMap<String, Signature>,
) -> StudioResult<String> {
    let signature = signatures.get(signature_id).ok_or_else(|| {
        StudioError::program_spec(format!("unknown signature '{signature_id}'"))
    })?;

    // Contract check: every dataset-bound module input must be declared by
    // the signature.
    for module in &spec.modules {
        for input in &module.inputs {
            let dataset_bound = spec.dataset_fields.iter().any(|f| f == input);
            if dataset_bound && !signature.has_input(input) {
                return Err(StudioError::program_spec(format!(
                    "signature does not declare dataset-bound field '{input}'"
                )));
            }
        }
    }

    for module in spec.modules.iter_mut() {
        if !matches!(module.kind, ModuleKind::Retrieve) {
            module.signature_id = Some(signature_id.to_string());
        }
    }

    spec.validate()?;
    Ok(spec.render_code(signatures))
}
