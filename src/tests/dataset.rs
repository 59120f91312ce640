use crate::dataset::{Dataset, Example, SplitRatios};
use crate::error::StudioError;

#[test]
fn json_document_round_trips_structurally() {
    let dataset = Dataset::new(
        "qa",
        vec![
            Example::labeled("2+2=?", "4"),
            Example::unlabeled("what is the capital of France?"),
        ],
    );
    let serialized = dataset.to_json().unwrap();
    let parsed = Dataset::from_json(&serialized).unwrap();
    assert_eq!(parsed, dataset);
}

#[test]
fn document_with_context_and_metadata_round_trips() {
    let doc = r#"{
        "task_name": "support",
        "schema_version": "1.0",
        "examples": [
            { "input": { "text": "reset my password",
                         "context": ["kb article 1", "kb article 2"],
                         "metadata": { "channel": "email" } },
              "ideal_output": { "label": "account", "explanation": "account issue" } }
        ]
    }"#;
    let dataset = Dataset::from_json(doc).unwrap();
    assert_eq!(dataset.name, "support");
    assert_eq!(dataset.examples[0].input.context.as_ref().unwrap().passages().len(), 2);
    assert_eq!(dataset.examples[0].expected_text().unwrap(), "account");

    let reparsed = Dataset::from_json(&dataset.to_json().unwrap()).unwrap();
    assert_eq!(reparsed, dataset);
}

#[test]
fn unsupported_schema_version_is_rejected() {
    let doc = r#"{ "task_name": "x", "schema_version": "2.0", "examples": [] }"#;
    assert!(matches!(
        Dataset::from_json(doc),
        Err(StudioError::DatasetSchema { .. })
    ));
}

#[test]
fn empty_input_text_violates_the_schema() {
    let dataset = Dataset::new("bad", vec![Example::labeled("  ", "x")]);
    assert!(matches!(
        dataset.validate(),
        Err(StudioError::DatasetSchema { .. })
    ));
}

#[test]
fn compilation_requires_five_examples() {
    let dataset = Dataset::new("tiny", vec![Example::labeled("a", "b")]);
    assert!(dataset.validate().is_ok());
    assert!(dataset.validate_for_compilation().is_err());
}

#[test]
fn splits_are_deterministic_for_a_seed() {
    let dataset = Dataset::new(
        "ten",
        (0..10).map(|i| Example::labeled(format!("q{i}"), "a")).collect(),
    );
    let ratios = SplitRatios::default();

    let first = dataset.split(7, ratios).unwrap();
    let second = dataset.split(7, ratios).unwrap();
    assert_eq!(first, second);

    let other_seed = dataset.split(8, ratios).unwrap();
    assert_ne!(first.train, other_seed.train);
}

#[test]
fn split_sizes_follow_the_ratios() {
    let dataset = Dataset::new(
        "ten",
        (0..10).map(|i| Example::labeled(format!("q{i}"), "a")).collect(),
    );
    let splits = dataset
        .split(1, SplitRatios { train: 0.6, dev: 0.2, test: 0.2 })
        .unwrap();
    assert_eq!(splits.train.len(), 6);
    assert_eq!(splits.dev.len(), 2);
    assert_eq!(splits.test.len(), 2);

    // Every example lands in exactly one split.
    let total = splits.train.len() + splits.dev.len() + splits.test.len();
    assert_eq!(total, dataset.len());
}

#[test]
fn ratios_must_sum_to_one() {
    let dataset = Dataset::new("d", vec![Example::labeled("q", "a")]);
    let result = dataset.split(1, SplitRatios { train: 0.5, dev: 0.2, test: 0.2 });
    assert!(matches!(result, Err(StudioError::Validation { .. })));
}

#[test]
fn csv_form_parses_with_metadata_columns() {
    let csv = "input,expected_output,channel,priority\n\
               reset my password,account,email,high\n\
               where is my order,shipping,chat,\n";
    let dataset = Dataset::from_csv("support", csv).unwrap();

    assert_eq!(dataset.len(), 2);
    assert_eq!(dataset.examples[0].input.text, "reset my password");
    assert_eq!(dataset.examples[0].expected_text().unwrap(), "account");
    assert_eq!(
        dataset.examples[0].input.metadata["channel"],
        serde_json::Value::String("email".to_string())
    );
    // Empty cells do not become metadata.
    assert!(!dataset.examples[1].input.metadata.contains_key("priority"));
}

#[test]
fn csv_without_expected_output_yields_unlabeled_examples() {
    let csv = "input\nfirst question\nsecond question\n";
    let dataset = Dataset::from_csv("unlabeled", csv).unwrap();
    assert_eq!(dataset.len(), 2);
    assert!(dataset.examples.iter().all(|e| e.expected.is_none()));
}

#[test]
fn next_version_supersedes_without_mutation() {
    let original = Dataset::new("v", vec![Example::labeled("q", "a")]);
    let next = original.next_version(vec![Example::labeled("q", "a"), Example::labeled("r", "b")]);
    assert_eq!(original.version, 1);
    assert_eq!(next.version, 2);
    assert_eq!(original.len(), 1);
    assert_ne!(original.id(), next.id());
}
