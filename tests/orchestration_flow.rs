//! End-to-end orchestration against a scripted provider.

mod common;

use common::{arithmetic_dataset, arithmetic_stub, orchestrator_with, wrong_answer_stub};
use prompt_studio::orchestrator::{ErrorType, OrchestrationStatus};
use prompt_studio::{
    ContextValue, Dataset, Example, OrchestrationRequest, PackageFormat, StepSink, StepStatus,
};
use std::sync::Arc;
use std::time::Duration;

fn dataset_with_context() -> Dataset {
    let mut dataset = arithmetic_dataset();
    for example in dataset.examples.iter_mut() {
        example.input.context = Some(ContextValue::Single(
            "Answers are base-10 integers.".to_string(),
        ));
    }
    dataset
}

#[tokio::test]
async fn classification_task_compiles_and_logs_an_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(dir.path(), arithmetic_stub());

    let request = OrchestrationRequest::new(
        "Classify each arithmetic question by its numeric answer",
        "local-stub",
        arithmetic_dataset(),
    );
    let outcome = orchestrator.orchestrate(request).await;

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.status, OrchestrationStatus::Success);
    let artifact_id = outcome.artifact_id.expect("artifact id");
    assert!(artifact_id.starts_with("v_"));
    assert!(!outcome.program_code.is_empty());
    assert!(outcome.task_analysis.is_some());
    assert!(!outcome.steps.is_empty());
    assert_eq!(outcome.iteration_count, 1);

    // The run and artifact landed in the store.
    let store = prompt_studio::HistoryStore::open(dir.path()).unwrap();
    let loaded = store.load_artifact(&artifact_id).unwrap();
    assert!(loaded.metric_value >= 0.7);
    assert_eq!(loaded.target_lm, "local-stub");
}

#[tokio::test]
async fn missing_context_field_is_self_corrected_in_two_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(dir.path(), arithmetic_stub());

    // The business goal carries no retrieval cue, so the first signature
    // omits the context field the dataset supplies.
    let request = OrchestrationRequest::new(
        "Classify each arithmetic flashcard by its numeric answer",
        "local-stub",
        dataset_with_context(),
    );
    let outcome = orchestrator.orchestrate(request).await;

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.iteration_count, 2);

    // The trace shows the failed compilation, the failure analysis, and the
    // signature repair before the second compilation.
    let names: Vec<&str> = outcome.steps.iter().map(|s| s.name.as_str()).collect();
    let first_compile = names.iter().position(|n| *n == "run compilation").unwrap();
    assert!(names[first_compile..].contains(&"analyze failure"));
    assert!(names[first_compile..].contains(&"re-finalize program assembly"));
    assert_eq!(
        names.iter().filter(|n| **n == "run compilation").count(),
        2
    );
}

#[tokio::test]
async fn unknown_target_fails_with_invalid_format() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(dir.path(), arithmetic_stub());

    let request = OrchestrationRequest::new(
        "Classify each arithmetic question by its numeric answer",
        "gpt-7-ultra",
        arithmetic_dataset(),
    );
    let outcome = orchestrator.orchestrate(request).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status, OrchestrationStatus::Failed);
    let error = outcome.error.expect("classified error");
    assert_eq!(error.error_type, ErrorType::InvalidFormat);
    // The step trace records the failing tool call.
    assert!(outcome
        .steps
        .iter()
        .any(|s| s.tool.as_deref() == Some("register_target_lm")
            && s.status == StepStatus::Error));
}

#[tokio::test]
async fn empty_dataset_is_rejected_before_any_lm_call() {
    let dir = tempfile::tempdir().unwrap();
    let stub = arithmetic_stub();
    let orchestrator = orchestrator_with(dir.path(), Arc::clone(&stub));

    let request = OrchestrationRequest::new(
        "Classify questions",
        "local-stub",
        Dataset::new("empty", Vec::new()),
    );
    let outcome = orchestrator.orchestrate(request).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status, OrchestrationStatus::Failed);
    assert_eq!(stub.call_count(), 0);
}

#[tokio::test]
async fn exhausted_iteration_budget_returns_a_partial_result() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(dir.path(), arithmetic_stub());

    let mut request = OrchestrationRequest::new(
        "Classify each arithmetic question by its numeric answer",
        "local-stub",
        arithmetic_dataset(),
    );
    request.max_iterations = 0;
    let outcome = orchestrator.orchestrate(request).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status, OrchestrationStatus::BudgetExhausted);
    assert_eq!(outcome.iteration_count, 0);
    assert!(outcome.error.is_none(), "budget exhaustion is not an error");
    assert!(!outcome.steps.is_empty(), "the partial step history survives");
}

#[tokio::test]
async fn persistently_low_metric_exhausts_the_budget() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(dir.path(), wrong_answer_stub());

    let mut request = OrchestrationRequest::new(
        "Classify each arithmetic question by its numeric answer",
        "local-stub",
        arithmetic_dataset(),
    );
    request.max_iterations = 3;
    request.max_wall_time = Duration::from_secs(60);
    let outcome = orchestrator.orchestrate(request).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status, OrchestrationStatus::BudgetExhausted);
    assert_eq!(outcome.iteration_count, 3);
    // Every iteration went through the correction path.
    assert!(outcome
        .steps
        .iter()
        .filter(|s| s.name == "analyze failure")
        .count() >= 2);
}

#[tokio::test]
async fn step_events_stream_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(dir.path(), arithmetic_stub());

    let (sink, mut rx) = StepSink::channel(256);
    let request = OrchestrationRequest::new(
        "Classify each arithmetic question by its numeric answer",
        "local-stub",
        arithmetic_dataset(),
    );
    let outcome = orchestrator.orchestrate_with_events(request, Some(sink)).await;
    assert!(outcome.success);

    let mut streamed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        streamed.push(event);
    }
    assert!(!streamed.is_empty());
    // Ids are monotone and match the recorded trace prefix.
    for pair in streamed.windows(2) {
        assert!(pair[0].id < pair[1].id);
    }
    assert_eq!(streamed[0].id, outcome.steps[0].id);
}

#[tokio::test]
async fn successful_artifact_exports_a_deployment_package() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(dir.path(), arithmetic_stub());

    let request = OrchestrationRequest::new(
        "Classify each arithmetic question by its numeric answer",
        "local-stub",
        arithmetic_dataset(),
    );
    let outcome = orchestrator.orchestrate(request).await;
    let artifact_id = outcome.artifact_id.expect("artifact id");

    let store = prompt_studio::HistoryStore::open(dir.path()).unwrap();
    let out = tempfile::tempdir().unwrap();
    let package = prompt_studio::orchestrator::package::export_deployment_package(
        &store,
        &artifact_id,
        out.path(),
        PackageFormat::Module,
    )
    .unwrap();

    assert!(package.join("manifest.json").exists());
    assert!(package.join("program.rs").exists());
    assert!(package.join("signatures.json").exists());
}
