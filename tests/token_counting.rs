//! Token counting integration tests.
//!
//! These load the tiktoken vocabularies, which is slow; they live here
//! rather than in the unit suite.

use prompt_studio::counter_for;

#[test]
fn cl100k_counts_plain_english() {
    let counter = counter_for("cl100k_base").unwrap();
    let count = counter.count_tokens("Hello, world!").unwrap();
    assert!(count >= 3 && count <= 6, "unexpected count {count}");
    assert_eq!(counter.tokenizer_id(), "cl100k_base");
}

#[test]
fn o200k_is_a_distinct_vocabulary() {
    let a = counter_for("cl100k_base").unwrap();
    let b = counter_for("o200k_base").unwrap();
    assert_ne!(a.tokenizer_id(), b.tokenizer_id());

    // Both produce sane counts on the same text.
    let text = "The committee reviewed the quarterly schedule.";
    assert!(a.count_tokens(text).unwrap() > 0);
    assert!(b.count_tokens(text).unwrap() > 0);
}

#[test]
fn unknown_tokenizer_falls_back_to_cl100k() {
    let counter = counter_for("mystery_bpe").unwrap();
    assert_eq!(counter.tokenizer_id(), "cl100k_base");
}

#[test]
fn truncation_respects_the_limit_and_is_identity_when_short() {
    let counter = counter_for("cl100k_base").unwrap();

    let short = "tiny";
    assert_eq!(counter.truncate_to_limit(short, 100).unwrap(), short);

    let long: String = "one two three four five six seven eight nine ten ".repeat(50);
    let truncated = counter.truncate_to_limit(&long, 20).unwrap();
    assert!(counter.count_tokens(&truncated).unwrap() <= 20);
    assert!(long.starts_with(&truncated));
}

#[test]
fn empty_text_counts_zero() {
    let counter = counter_for("cl100k_base").unwrap();
    assert_eq!(counter.count_tokens("").unwrap(), 0);
}
