use crate::config::{env_var_name, StudioConfig, TargetLm};
use crate::error::StudioError;
use serial_test::serial;

#[test]
fn builtin_configuration_is_valid() {
    let config = StudioConfig::with_builtin_providers();
    config.validate().unwrap();
    // Every closed target resolves through the builtin bindings.
    for target in TargetLm::ALL {
        config.resolve_target(target).unwrap();
    }
}

#[test]
fn document_round_trips_through_json() {
    let config = StudioConfig::with_builtin_providers();
    let json = serde_json::to_string(&config).unwrap();
    let parsed = StudioConfig::from_json(&json).unwrap();
    assert_eq!(parsed.models, config.models);
    assert_eq!(parsed.rate_limits, config.rate_limits);
}

#[test]
fn model_referencing_unknown_provider_is_rejected() {
    let json = r#"{
        "providers": { "openai": { "tokenizer": "cl100k_base" } },
        "models": { "gpt-4o": { "provider": "nonexistent", "model": "gpt-4o" } }
    }"#;
    assert!(matches!(
        StudioConfig::from_json(json),
        Err(StudioError::Configuration { .. })
    ));
}

#[test]
fn empty_tokenizer_is_rejected() {
    let json = r#"{ "providers": { "openai": { "tokenizer": "" } } }"#;
    assert!(StudioConfig::from_json(json).is_err());
}

#[test]
fn unknown_logging_level_is_rejected() {
    let json = r#"{ "logging": { "level": "loud" } }"#;
    assert!(StudioConfig::from_json(json).is_err());
}

#[test]
fn env_var_names_derive_from_dotted_paths() {
    assert_eq!(
        env_var_name("rate_limits.requests_per_minute"),
        "PROMPT_STUDIO_RATE_LIMITS__REQUESTS_PER_MINUTE"
    );
    assert_eq!(env_var_name("cache.ttl_seconds"), "PROMPT_STUDIO_CACHE__TTL_SECONDS");
    assert_eq!(env_var_name("logging.level"), "PROMPT_STUDIO_LOGGING__LEVEL");
}

#[test]
#[serial]
fn environment_overrides_scalar_fields() {
    std::env::set_var("PROMPT_STUDIO_CACHE__TTL_SECONDS", "120");
    std::env::set_var("PROMPT_STUDIO_RATE_LIMITS__REQUESTS_PER_MINUTE", "7");
    std::env::set_var("PROMPT_STUDIO_LOGGING__LEVEL", "debug");

    let mut config = StudioConfig::default();
    config.apply_env_overrides().unwrap();

    assert_eq!(config.cache.ttl_seconds, 120);
    assert_eq!(config.rate_limits.requests_per_minute, 7);
    assert_eq!(config.logging.level, "debug");

    std::env::remove_var("PROMPT_STUDIO_CACHE__TTL_SECONDS");
    std::env::remove_var("PROMPT_STUDIO_RATE_LIMITS__REQUESTS_PER_MINUTE");
    std::env::remove_var("PROMPT_STUDIO_LOGGING__LEVEL");
}

#[test]
#[serial]
fn unparseable_override_is_a_configuration_error() {
    std::env::set_var("PROMPT_STUDIO_CACHE__TTL_SECONDS", "not-a-number");

    let mut config = StudioConfig::default();
    let result = config.apply_env_overrides();
    assert!(matches!(result, Err(StudioError::Configuration { .. })));

    std::env::remove_var("PROMPT_STUDIO_CACHE__TTL_SECONDS");
}

#[test]
fn target_identifiers_form_a_closed_set() {
    assert_eq!(TargetLm::parse("gpt-4o").unwrap(), TargetLm::Gpt4o);
    assert_eq!(
        TargetLm::parse("claude-3-5-sonnet").unwrap(),
        TargetLm::Claude35Sonnet
    );
    assert!(matches!(
        TargetLm::parse("gpt-7-ultra"),
        Err(StudioError::UnknownTarget { .. })
    ));
}

#[test]
fn unknown_target_severity_is_critical() {
    let error = TargetLm::parse("not-a-model").unwrap_err();
    assert_eq!(error.severity(), crate::error::ErrorSeverity::Critical);
}
