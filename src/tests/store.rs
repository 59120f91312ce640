use crate::eval::{EvaluationRun, RunMetadata};
use crate::program::{CompiledProgram, ModuleKind, ModuleNode, ProgramSpec};
use crate::store::{HistoryStore, RegressionSeverity, TrendDirection};
use chrono::Utc;
use std::collections::BTreeMap;

fn run_with_metric(prompt_id: &str, run_id: &str, value: f64) -> EvaluationRun {
    let mut metrics = BTreeMap::new();
    metrics.insert("exact_match".to_string(), value);
    EvaluationRun {
        run_id: run_id.to_string(),
        prompt_id: prompt_id.to_string(),
        prompt_version: 1,
        prompt_text: "Answer: {input}".to_string(),
        dataset_id: "d@v1".to_string(),
        dataset_name: "d".to_string(),
        metrics,
        summaries: BTreeMap::new(),
        per_case: Vec::new(),
        errored_cases: 0,
        metadata: RunMetadata {
            provider: "stub".to_string(),
            model: "stub-v1".to_string(),
            temperature: 0.2,
        },
        timestamp: Utc::now(),
    }
}

fn compiled_program(metric_value: f64) -> CompiledProgram {
    let mut spec = ProgramSpec::new(vec!["input".to_string()]);
    spec.add_module(ModuleNode::new("MainPredictor", ModuleKind::Predict)).unwrap();
    CompiledProgram {
        spec,
        signatures: BTreeMap::new(),
        demonstrations: Vec::new(),
        optimizer: "bootstrap_few_shot".to_string(),
        optimizer_params: BTreeMap::new(),
        metric_name: "exact_match".to_string(),
        metric_value,
        target_lm: "local-stub".to_string(),
        program_code: "// program".to_string(),
    }
}

#[test]
fn saved_runs_are_byte_immutable() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();

    let run_id = store.save_evaluation(&run_with_metric("p1", "run_imm", 0.9)).unwrap();
    let path = dir.path().join("runs").join(format!("{run_id}.json"));
    let first_bytes = std::fs::read(&path).unwrap();

    // Unrelated writes leave the record untouched.
    store.save_evaluation(&run_with_metric("p1", "run_other", 0.8)).unwrap();
    store.save_evaluation(&run_with_metric("p2", "run_more", 0.7)).unwrap();
    let later_bytes = std::fs::read(&path).unwrap();
    assert_eq!(first_bytes, later_bytes);
}

#[test]
fn prompt_history_is_reverse_chronological_and_limited() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();

    for i in 0..5 {
        store
            .save_evaluation(&run_with_metric("p1", &format!("run_{i}"), 0.5 + i as f64 / 10.0))
            .unwrap();
    }
    store.save_evaluation(&run_with_metric("p2", "run_x", 0.1)).unwrap();

    let history = store.get_prompt_history("p1", 3).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].run_id, "run_4");
    assert_eq!(history[1].run_id, "run_3");
    assert_eq!(history[2].run_id, "run_2");
}

#[test]
fn dataset_history_filters_by_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    store.save_evaluation(&run_with_metric("p1", "run_a", 0.5)).unwrap();

    let history = store.get_dataset_history("d@v1", 10).unwrap();
    assert_eq!(history.len(), 1);
    assert!(store.get_dataset_history("other@v1", 10).unwrap().is_empty());
}

#[test]
fn tombstoned_runs_leave_history_but_not_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    let run_id = store.save_evaluation(&run_with_metric("p1", "run_del", 0.5)).unwrap();

    store.delete_run(&run_id).unwrap();
    assert!(store.get_prompt_history("p1", 10).unwrap().is_empty());
    // The record file itself is never rewritten or removed.
    assert!(dir.path().join("runs").join(format!("{run_id}.json")).exists());
}

#[test]
fn regression_is_detected_on_a_recent_drop() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();

    let mut values = vec![0.9; 8];
    values.push(0.70);
    values.push(0.72);
    for (i, value) in values.iter().enumerate() {
        store
            .save_evaluation(&run_with_metric("p1", &format!("run_{i}"), *value))
            .unwrap();
    }

    let report = store.detect_regression("p1", "exact_match", 0.05, 2).unwrap();
    assert!(report.regression_detected);
    assert!((report.baseline_mean - 0.9).abs() < 1e-9);
    assert!((report.recent_mean - 0.71).abs() < 1e-9);
    // drop = (0.9 - 0.71) / 0.9, about 21%: the top severity band.
    assert!((report.drop_fraction - 0.19 / 0.9).abs() < 1e-9);
    assert_eq!(report.severity, RegressionSeverity::High);
}

#[test]
fn no_regression_on_stable_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    for i in 0..6 {
        store
            .save_evaluation(&run_with_metric("p1", &format!("run_{i}"), 0.85))
            .unwrap();
    }
    let report = store.detect_regression("p1", "exact_match", 0.05, 2).unwrap();
    assert!(!report.regression_detected);
    assert_eq!(report.severity, RegressionSeverity::None);
}

#[test]
fn regression_with_insufficient_history_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    store.save_evaluation(&run_with_metric("p1", "run_0", 0.5)).unwrap();

    let report = store.detect_regression("p1", "exact_match", 0.05, 2).unwrap();
    assert!(!report.regression_detected);
}

#[test]
fn trend_classifies_slope_direction() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();

    for (i, value) in [0.5, 0.6, 0.7, 0.8, 0.9].iter().enumerate() {
        store
            .save_evaluation(&run_with_metric("up", &format!("up_{i}"), *value))
            .unwrap();
    }
    for (i, value) in [0.9, 0.8, 0.7, 0.6, 0.5].iter().enumerate() {
        store
            .save_evaluation(&run_with_metric("down", &format!("down_{i}"), *value))
            .unwrap();
    }
    for i in 0..5 {
        store
            .save_evaluation(&run_with_metric("flat", &format!("flat_{i}"), 0.7))
            .unwrap();
    }

    let up = store.get_trend("up", "exact_match", 10).unwrap();
    assert_eq!(up.direction, TrendDirection::Improving);
    assert!((up.slope - 0.1).abs() < 1e-9);

    let down = store.get_trend("down", "exact_match", 10).unwrap();
    assert_eq!(down.direction, TrendDirection::Declining);

    let flat = store.get_trend("flat", "exact_match", 10).unwrap();
    assert_eq!(flat.direction, TrendDirection::Stable);
    assert_eq!(flat.points.len(), 5);
}

#[test]
fn artifact_ids_are_daily_monotone() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();

    let first = store
        .save_artifact("p1", &compiled_program(0.8), None, BTreeMap::new())
        .unwrap();
    let second = store
        .save_artifact("p1", &compiled_program(0.9), None, BTreeMap::new())
        .unwrap();

    assert!(first.ends_with("_001"), "unexpected id {first}");
    assert!(second.ends_with("_002"), "unexpected id {second}");
    assert_eq!(&first[..11], &second[..11]); // same v_YYYYMMDD prefix
}

#[test]
fn artifact_round_trips_through_the_package() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    let program = compiled_program(0.85);

    let artifact_id = store
        .save_artifact("p1", &program, Some(&run_with_metric("p1", "run_a", 0.85)), BTreeMap::new())
        .unwrap();

    let loaded = store.load_artifact(&artifact_id).unwrap();
    assert_eq!(loaded, program);

    // The package directory carries the documented layout.
    let package = dir.path().join("artifacts").join(&artifact_id);
    for file in [
        "metadata.json",
        "signature.json",
        "program.rs",
        "compiled_program.bin",
        "optimizer_config.json",
        "eval_results.json",
    ] {
        assert!(package.join(file).exists(), "missing {file}");
    }
    assert!(package.join("demos").is_dir());
}

#[test]
fn rollback_repoints_the_active_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();

    let old = store
        .save_artifact("p1", &compiled_program(0.8), None, BTreeMap::new())
        .unwrap();
    let new = store
        .save_artifact("p1", &compiled_program(0.9), None, BTreeMap::new())
        .unwrap();
    assert_eq!(store.active_artifact("p1").unwrap(), new);

    let restored = store.rollback("p1", &old).unwrap();
    assert_eq!(store.active_artifact("p1").unwrap(), old);
    // The rolled-back program reproduces its recorded metric.
    assert!((restored.metric_value - 0.8).abs() < 1e-9);
}

#[test]
fn rollback_rejects_foreign_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    let other = store
        .save_artifact("other-prompt", &compiled_program(0.8), None, BTreeMap::new())
        .unwrap();
    assert!(store.rollback("p1", &other).is_err());
}

#[test]
fn list_artifacts_preserves_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    let a = store
        .save_artifact("p1", &compiled_program(0.1), None, BTreeMap::new())
        .unwrap();
    let b = store
        .save_artifact("p1", &compiled_program(0.2), None, BTreeMap::new())
        .unwrap();

    let listed: Vec<String> = store.list_artifacts().into_iter().map(|e| e.artifact_id).collect();
    assert_eq!(listed, vec![a, b]);
}
