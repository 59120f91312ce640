use crate::mutators::{
    apply_noise, inject_template, pad_to_multiplier, FormatMutator, NoiseLevel,
    INJECTION_TEMPLATES,
};

fn char_tokens(text: &str) -> u32 {
    ((text.len() / 4).max(1)) as u32
}

#[test]
fn format_mutators_are_pure_and_deterministic() {
    let input = "Hello, World. This is a test.";
    for mutator in FormatMutator::ALL {
        assert_eq!(mutator.apply(input), mutator.apply(input), "{}", mutator.name());
    }
}

#[test]
fn case_mutators_change_only_casing() {
    assert_eq!(FormatMutator::Uppercase.apply("abc"), "ABC");
    assert_eq!(FormatMutator::Lowercase.apply("ABC"), "abc");
    assert_eq!(FormatMutator::TitleCase.apply("hello world"), "Hello World");
}

#[test]
fn punctuation_mutators_strip_and_double() {
    assert_eq!(FormatMutator::PunctuationStrip.apply("a, b. c!"), "a b c");
    assert_eq!(FormatMutator::PunctuationDouble.apply("a, b."), "a,, b..");
}

#[test]
fn whitespace_mutators_expand_spacing() {
    assert_eq!(FormatMutator::WhitespaceDouble.apply("a b"), "a  b");
    assert_eq!(FormatMutator::TabInjection.apply("a b"), "a\tb");
}

#[test]
fn padding_reaches_the_token_multiplier() {
    let input = "What is the total of the order placed on Tuesday by the Lisbon office?";
    let base = char_tokens(input);

    for multiplier in [2u32, 4, 8] {
        let padded = pad_to_multiplier(input, multiplier, 11, &char_tokens);
        assert!(
            char_tokens(&padded) >= base * multiplier,
            "multiplier {multiplier} fell short: {} < {}",
            char_tokens(&padded),
            base * multiplier
        );
        // The informative region survives verbatim.
        assert!(padded.contains(input));
    }
}

#[test]
fn padding_is_reproducible_per_seed_and_identity_at_one() {
    let input = "short question";
    assert_eq!(pad_to_multiplier(input, 1, 3, &char_tokens), input);

    let a = pad_to_multiplier(input, 4, 3, &char_tokens);
    let b = pad_to_multiplier(input, 4, 3, &char_tokens);
    assert_eq!(a, b);

    let other_seed = pad_to_multiplier(input, 4, 4, &char_tokens);
    assert_ne!(a, other_seed);
}

#[test]
fn noise_is_seeded_and_rate_bounded() {
    let input = "a reasonably long input string used for noise calibration tests";

    let a = apply_noise(input, NoiseLevel::Medium, 9);
    let b = apply_noise(input, NoiseLevel::Medium, 9);
    assert_eq!(a, b);

    let different = apply_noise(input, NoiseLevel::Medium, 10);
    assert_ne!(a, different);

    // Heavier levels perturb at least as much as light ones on average;
    // verify the op count bound through length change limits. Each op
    // changes length by at most one character.
    let light = apply_noise(input, NoiseLevel::Light, 9);
    let max_light_ops = ((input.chars().count() as f64 * NoiseLevel::Light.rate()).ceil() as usize).max(1);
    let delta = (light.chars().count() as isize - input.chars().count() as isize).unsigned_abs();
    assert!(delta <= max_light_ops);
}

#[test]
fn noise_on_empty_input_is_empty() {
    assert_eq!(apply_noise("", NoiseLevel::Heavy, 1), "");
}

#[test]
fn injection_appends_a_catalog_template() {
    let attacked = inject_template("summarize this report", 0);
    assert!(attacked.starts_with("summarize this report"));
    assert!(attacked.contains(INJECTION_TEMPLATES[0]));

    // Indices wrap around the catalog.
    let wrapped = inject_template("x", INJECTION_TEMPLATES.len());
    assert!(wrapped.contains(INJECTION_TEMPLATES[0]));
}

#[test]
fn nfkc_folds_compatibility_forms() {
    // U+FF21 FULLWIDTH LATIN CAPITAL LETTER A folds to 'A' under NFKC.
    assert_eq!(FormatMutator::NfkcNormalize.apply("\u{FF21}"), "A");
    // NFC leaves it alone.
    assert_eq!(FormatMutator::NfcNormalize.apply("\u{FF21}"), "\u{FF21}");
}
