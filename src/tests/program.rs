use crate::error::StudioError;
use crate::program::{Edge, ModuleKind, ModuleNode, ProgramSpec, TacticPosition};
use std::collections::BTreeMap;

fn rag_spec() -> ProgramSpec {
    let mut spec = ProgramSpec::new(vec!["input".to_string()]);
    let retriever = spec
        .add_module(ModuleNode::new("Retriever", ModuleKind::Retrieve))
        .unwrap();
    let mut main = ModuleNode::new("MainPredictor", ModuleKind::Predict);
    main.inputs = vec!["input".to_string(), "context".to_string()];
    let main_idx = spec.add_module(main).unwrap();
    spec.connect(retriever, "context", main_idx, "context").unwrap();
    spec
}

#[test]
fn valid_rag_pipeline_passes_validation() {
    let spec = rag_spec();
    spec.validate().unwrap();
    assert_eq!(spec.terminal_indices(), vec![1]);
}

#[test]
fn duplicate_module_names_are_rejected() {
    let mut spec = ProgramSpec::new(vec!["input".to_string()]);
    spec.add_module(ModuleNode::new("M", ModuleKind::Predict)).unwrap();
    let result = spec.add_module(ModuleNode::new("M", ModuleKind::Predict));
    assert!(matches!(result, Err(StudioError::ProgramSpec { .. })));
}

#[test]
fn cycles_are_rejected() {
    let mut spec = ProgramSpec::new(vec!["input".to_string()]);
    let a = spec.add_module(ModuleNode::new("A", ModuleKind::Predict)).unwrap();
    let b = spec.add_module(ModuleNode::new("B", ModuleKind::Predict)).unwrap();
    // Hand-wire a 2-cycle through the raw edge list.
    spec.edges.push(Edge {
        producer: a,
        producer_field: "output".to_string(),
        consumer: b,
        consumer_field: "input".to_string(),
    });
    spec.edges.push(Edge {
        producer: b,
        producer_field: "output".to_string(),
        consumer: a,
        consumer_field: "input".to_string(),
    });
    let error = spec.validate().unwrap_err();
    assert!(error.to_string().contains("cycle"));
}

#[test]
fn unbound_consumer_fields_are_rejected() {
    let mut spec = ProgramSpec::new(vec!["input".to_string()]);
    let mut module = ModuleNode::new("M", ModuleKind::Predict);
    module.inputs = vec!["input".to_string(), "context".to_string()];
    spec.add_module(module).unwrap();

    let error = spec.validate().unwrap_err();
    assert!(error.to_string().contains("context"));
}

#[test]
fn exactly_one_terminal_is_required() {
    let mut spec = ProgramSpec::new(vec!["input".to_string()]);
    spec.add_module(ModuleNode::new("A", ModuleKind::Predict)).unwrap();
    spec.add_module(ModuleNode::new("B", ModuleKind::Predict)).unwrap();
    let error = spec.validate().unwrap_err();
    assert!(error.to_string().contains("terminal"));
}

#[test]
fn connect_rejects_unknown_fields() {
    let mut spec = ProgramSpec::new(vec!["input".to_string()]);
    let a = spec.add_module(ModuleNode::new("A", ModuleKind::Predict)).unwrap();
    let b = spec.add_module(ModuleNode::new("B", ModuleKind::Predict)).unwrap();
    assert!(spec.connect(a, "no_such_field", b, "input").is_err());
    assert!(spec.connect(a, "output", b, "no_such_field").is_err());
}

#[test]
fn append_tactic_extends_the_terminal() {
    let mut spec = rag_spec();
    let idx = spec
        .apply_tactic(
            ModuleNode::new("OutputGuard", ModuleKind::Retry),
            TacticPosition::Append,
            None,
        )
        .unwrap();
    spec.validate().unwrap();
    assert_eq!(spec.terminal_indices(), vec![idx]);
}

#[test]
fn before_a_root_is_an_illegal_position() {
    let mut spec = rag_spec();
    // The retriever has no upstream producer.
    let result = spec.apply_tactic(
        ModuleNode::new("Pre", ModuleKind::Predict),
        TacticPosition::Before,
        Some("Retriever"),
    );
    assert!(matches!(result, Err(StudioError::ProgramSpec { .. })));
}

#[test]
fn before_an_inner_module_rewires_the_edge() {
    let mut spec = rag_spec();
    let idx = spec
        .apply_tactic(
            ModuleNode::new("Reranker", ModuleKind::Predict),
            TacticPosition::Before,
            Some("MainPredictor"),
        )
        .unwrap();
    spec.validate().unwrap();

    // The retriever now feeds the reranker, which feeds the predictor.
    let main = spec.index_of("MainPredictor").unwrap();
    assert!(spec.edges.iter().any(|e| e.consumer == idx));
    assert!(spec.edges.iter().any(|e| e.producer == idx && e.consumer == main));
}

#[test]
fn after_redirects_downstream_consumers() {
    let mut spec = rag_spec();
    let idx = spec
        .apply_tactic(
            ModuleNode::new("ContextFilter", ModuleKind::Predict),
            TacticPosition::After,
            Some("Retriever"),
        )
        .unwrap();
    spec.validate().unwrap();

    let main = spec.index_of("MainPredictor").unwrap();
    // The filter consumes the retriever and feeds the main predictor.
    assert!(spec.edges.iter().any(|e| e.producer == idx && e.consumer == main));
}

#[test]
fn replace_keeps_the_wiring() {
    let mut spec = rag_spec();
    let idx = spec
        .apply_tactic(
            ModuleNode::new("CotPredictor", ModuleKind::ChainOfThought),
            TacticPosition::Replace,
            Some("MainPredictor"),
        )
        .unwrap();
    spec.validate().unwrap();
    assert_eq!(spec.modules[idx].name, "CotPredictor");
    assert_eq!(spec.modules[idx].kind, ModuleKind::ChainOfThought);
    // Inherited field lists keep existing edges valid.
    assert!(spec.modules[idx].inputs.contains(&"context".to_string()));
}

#[test]
fn replace_and_tactics_require_an_anchor() {
    let mut spec = rag_spec();
    let result = spec.apply_tactic(
        ModuleNode::new("X", ModuleKind::Predict),
        TacticPosition::Replace,
        None,
    );
    assert!(matches!(result, Err(StudioError::ProgramSpec { .. })));

    let result = spec.apply_tactic(
        ModuleNode::new("X", ModuleKind::Predict),
        TacticPosition::After,
        Some("NoSuchModule"),
    );
    assert!(matches!(result, Err(StudioError::ProgramSpec { .. })));
}

#[test]
fn rendered_code_names_every_module() {
    let spec = rag_spec();
    let code = spec.render_code(&BTreeMap::new());
    assert!(code.contains("retriever"));
    assert!(code.contains("mainpredictor"));
    assert!(code.contains("terminal output"));
}

#[test]
fn spec_serialization_round_trips() {
    let spec = rag_spec();
    let json = serde_json::to_string(&spec).unwrap();
    let parsed: ProgramSpec = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, spec);
}
