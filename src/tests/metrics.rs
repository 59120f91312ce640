use crate::metrics::reference::{corpus_bleu, normalize};
use crate::metrics::{
    cosine_similarity, summarize, variance, BleuScorer, ExactMatchScorer, MetricRegistry,
    RougeLScorer, Scorer, TokenF1Scorer,
};

#[test]
fn exact_match_ignores_case_and_whitespace() {
    let scorer = ExactMatchScorer;
    assert_eq!(scorer.score("  The Answer ", "the answer"), Some(1.0));
    assert_eq!(scorer.score("the answer", "another answer"), Some(0.0));
}

#[test]
fn normalize_collapses_internal_whitespace() {
    assert_eq!(normalize("  A\t B \n C "), "a b c");
}

#[test]
fn bleu_is_one_for_identical_text() {
    let scorer = BleuScorer::default();
    let score = scorer
        .score("the quick brown fox jumps", "the quick brown fox jumps")
        .unwrap();
    assert!((score - 1.0).abs() < 1e-9, "identical text should score 1.0, got {score}");
}

#[test]
fn bleu_penalizes_divergent_text() {
    let scorer = BleuScorer::default();
    let perfect = scorer.score("a b c d e", "a b c d e").unwrap();
    let partial = scorer.score("a b x y z", "a b c d e").unwrap();
    assert!(partial < perfect);
    assert!(partial >= 0.0);
}

#[test]
fn bleu_is_undefined_for_empty_sides() {
    let scorer = BleuScorer::default();
    assert_eq!(scorer.score("", "reference"), None);
    assert_eq!(scorer.score("prediction", ""), None);
}

#[test]
fn corpus_bleu_pools_statistics() {
    let pairs = vec![
        ("the cat sat".to_string(), "the cat sat".to_string()),
        ("a dog ran".to_string(), "a dog ran".to_string()),
    ];
    let score = corpus_bleu(&pairs, 4).unwrap();
    assert!((score - 1.0).abs() < 1e-9);

    assert_eq!(corpus_bleu(&[], 4), None);
}

#[test]
fn rouge_l_rewards_subsequence_overlap() {
    let scorer = RougeLScorer;
    assert_eq!(scorer.score("a b c", "a b c"), Some(1.0));

    // LCS("a x c", "a b c") = "a c" -> p = r = 2/3
    let score = scorer.score("a x c", "a b c").unwrap();
    assert!((score - 2.0 / 3.0).abs() < 1e-9);

    assert_eq!(scorer.score("x y z", "a b c"), Some(0.0));
}

#[test]
fn token_f1_counts_clipped_overlap() {
    let scorer = TokenF1Scorer;
    assert_eq!(scorer.score("paris", "paris"), Some(1.0));

    // one shared token out of two on each side -> F1 = 0.5
    let score = scorer.score("paris france", "paris spain").unwrap();
    assert!((score - 0.5).abs() < 1e-9);
}

#[test]
fn registry_omits_undefined_metrics() {
    let registry = MetricRegistry::default();
    let scores = registry.score_all("", "reference");
    // BLEU/ROUGE are undefined on an empty prediction but exact match is not.
    assert!(scores.contains_key("exact_match"));
    assert!(!scores.contains_key("bleu"));
    assert!(!scores.contains_key("rouge_l"));
}

#[test]
fn summarize_reports_the_distribution() {
    let summary = summarize(&[0.1, 0.9, 0.5, 0.3, 0.7]).unwrap();
    assert!((summary.mean - 0.5).abs() < 1e-9);
    assert!((summary.median - 0.5).abs() < 1e-9);
    assert!((summary.min - 0.1).abs() < 1e-9);
    assert!((summary.max - 0.9).abs() < 1e-9);
    assert_eq!(summary.count, 5);

    assert!(summarize(&[]).is_none());
}

#[test]
fn summarize_p95_tracks_the_upper_tail() {
    let values: Vec<f64> = (1..=100).map(f64::from).collect();
    let summary = summarize(&values).unwrap();
    assert!((summary.p95 - 95.0).abs() < 1e-9);
}

#[test]
fn variance_is_undefined_below_two_samples() {
    assert_eq!(variance(&[]), None);
    assert_eq!(variance(&[1.0]), None);
    let v = variance(&[1.0, 3.0]).unwrap();
    assert!((v - 2.0).abs() < 1e-9);
}

#[test]
fn cosine_similarity_handles_degenerate_vectors() {
    assert_eq!(cosine_similarity(&[], &[]), None);
    assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), None);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), None);

    let same = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
    assert!((same - 1.0).abs() < 1e-9);

    let orthogonal = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
    assert!(orthogonal.abs() < 1e-9);
}
