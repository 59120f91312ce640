//! Judge-based and paired evaluation modes, and the combined report.

mod common;

use common::{arithmetic_dataset, arithmetic_stub, client_over};
use prompt_studio::{
    CancelFlag, Dataset, Evaluator, Example, GenerationParams, JudgeCriterion, LlmJudge, Prompt,
    ReportDepth, StubProvider,
};
use std::sync::Arc;

fn params() -> GenerationParams {
    GenerationParams::default()
}

fn rating_stub() -> Arc<StubProvider> {
    Arc::new(StubProvider::fixed(
        "judge-v1",
        "accuracy: 5\nhelpfulness: 4\nharmlessness: 5\nhonesty: 4\nrationale: grounded and complete",
    ))
}

#[tokio::test]
async fn judge_ratings_fold_into_the_run() {
    let judge = LlmJudge::new(client_over(rating_stub()));
    let evaluator = Evaluator::new(client_over(arithmetic_stub())).with_judge(Arc::new(judge));

    let prompt = Prompt::new("p1", "Q: {input}\nA:").unwrap();
    let run = evaluator
        .evaluate_with_judge(&prompt, &arithmetic_dataset(), &params(), &CancelFlag::new())
        .await
        .unwrap();

    // (4.5 - 1) / 4 = 0.875 on the 1-5 scale.
    assert!((run.metrics["llm_judge"] - 0.875).abs() < 1e-9);
    for case in run.per_case.iter().filter(|c| c.error.is_none()) {
        assert!((case.metrics["llm_judge"] - 0.875).abs() < 1e-9);
    }
}

#[tokio::test]
async fn judge_parses_partial_replies() {
    let partial = Arc::new(StubProvider::fixed("judge-v1", "accuracy: 3\nnoise line\n"));
    let judge = LlmJudge::new(client_over(partial));

    let verdict = judge.rate("input", "output").await.unwrap();
    assert_eq!(verdict.scores.len(), 1);
    assert!((verdict.normalized - 0.5).abs() < 1e-9);
    assert!(verdict.rationale.is_none());
}

#[tokio::test]
async fn judge_scale_and_criteria_are_validated() {
    let judge = LlmJudge::new(client_over(rating_stub()));
    assert!(judge.with_criteria(vec![], 5).is_err());

    let judge = LlmJudge::new(client_over(rating_stub()));
    assert!(judge
        .with_criteria(vec![JudgeCriterion::Accuracy], 7)
        .is_err());
}

#[tokio::test]
async fn mutual_consistency_counts_cross_judgements() {
    let endorse_judge = LlmJudge::new(client_over(Arc::new(StubProvider::fixed(
        "judge-v1",
        "endorse",
    ))));
    let evaluator =
        Evaluator::new(client_over(arithmetic_stub())).with_judge(Arc::new(endorse_judge));

    let prompt_a = Prompt::new("pa", "Answer precisely: {input}").unwrap();
    let prompt_b = Prompt::new("pb", "Reply with the result: {input}").unwrap();
    let dataset = Dataset::new(
        "d",
        vec![Example::labeled("2+2=?", "4"), Example::labeled("3+3=?", "6")],
    );

    let report = evaluator
        .evaluate_mutual(&prompt_a, &prompt_b, &dataset, &params(), &CancelFlag::new())
        .await
        .unwrap();

    // Two prompts x two cases, judged in both directions.
    assert_eq!(report.judgements, 4);
    assert_eq!(report.endorsements, 4);
    assert_eq!(report.cross_agreement, 1.0);
    assert_eq!(report.conflict_rate, 0.0);
}

#[tokio::test]
async fn malformed_mutual_judgement_breaks_toward_conflict() {
    let rambling_judge = LlmJudge::new(client_over(Arc::new(StubProvider::fixed(
        "judge-v1",
        "well, it depends on several factors",
    ))));
    let evaluator =
        Evaluator::new(client_over(arithmetic_stub())).with_judge(Arc::new(rambling_judge));

    let prompt_a = Prompt::new("pa", "A: {input}").unwrap();
    let prompt_b = Prompt::new("pb", "B: {input}").unwrap();
    let dataset = Dataset::new("d", vec![Example::labeled("2+2=?", "4")]);

    let report = evaluator
        .evaluate_mutual(&prompt_a, &prompt_b, &dataset, &params(), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.conflicts, report.judgements);
    assert_eq!(report.conflict_rate, 1.0);
}

#[tokio::test]
async fn mutual_consistency_requires_a_judge() {
    let evaluator = Evaluator::new(client_over(arithmetic_stub()));
    let prompt_a = Prompt::new("pa", "A: {input}").unwrap();
    let prompt_b = Prompt::new("pb", "B: {input}").unwrap();
    let dataset = Dataset::new("d", vec![Example::labeled("2+2=?", "4")]);

    assert!(evaluator
        .evaluate_mutual(&prompt_a, &prompt_b, &dataset, &params(), &CancelFlag::new())
        .await
        .is_err());
}

#[tokio::test]
async fn standard_report_includes_consistency_and_format_robustness() {
    let evaluator = Evaluator::new(client_over(arithmetic_stub()));
    let prompt = Prompt::new("p1", "Q: {input}\nA:").unwrap();

    let report = evaluator
        .full_report(
            &prompt,
            &arithmetic_dataset(),
            &params(),
            ReportDepth::Standard,
            &CancelFlag::new(),
        )
        .await
        .unwrap();

    let consistency = report.consistency.expect("consistency section");
    assert_eq!(consistency.samples_per_case, 3);
    assert!(report.format_robustness.is_some());
    assert!(report.length_robustness.is_none());
    assert!(report.adversarial.is_none());
    assert!(report.overall >= 0.0 && report.overall <= 1.0);
}
