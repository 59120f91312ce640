//! Configuration for the studio.
//!
//! One document enumerates providers, target-model bindings, rate limits,
//! cache behaviour, and logging. It can be built programmatically, parsed
//! from JSON, or overridden from the environment. This module is the ONLY
//! place that reads environment variables.
//!
//! # Quick start
//!
//! ```rust
//! use prompt_studio::StudioConfig;
//!
//! let config = StudioConfig::default();
//! assert_eq!(config.rate_limits.requests_per_minute, 60);
//! config.validate().unwrap();
//! ```
//!
//! # Environment overrides
//!
//! Override names derive from the dotted path: upper-cased, dots replaced
//! by `__`, prefixed with `PROMPT_STUDIO_`:
//!
//! | Dotted path | Variable |
//! |-------------|----------|
//! | `rate_limits.requests_per_minute` | `PROMPT_STUDIO_RATE_LIMITS__REQUESTS_PER_MINUTE` |
//! | `cache.enabled` | `PROMPT_STUDIO_CACHE__ENABLED` |
//! | `cache.ttl_seconds` | `PROMPT_STUDIO_CACHE__TTL_SECONDS` |
//! | `logging.level` | `PROMPT_STUDIO_LOGGING__LEVEL` |

use crate::error::{StudioError, StudioResult};
use crate::logging::log_debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Per-1k-token pricing for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Pricing {
    /// USD per 1000 input tokens.
    pub input_per_1k: f64,
    /// USD per 1000 output tokens.
    pub output_per_1k: f64,
}

/// One provider entry in the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Base endpoint; `None` selects the provider's built-in default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Tokenizer identity ("cl100k_base" | "o200k_base"). Part of the
    /// response-cache key bundle.
    pub tokenizer: String,
    /// Cost model for [`estimate_cost`](crate::provider::LmProvider::estimate_cost).
    #[serde(default)]
    pub pricing: Pricing,
}

/// A target identifier resolved to a concrete provider and model id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelBinding {
    /// Key into [`StudioConfig::providers`].
    pub provider: String,
    /// Provider-side model identifier.
    pub model: String,
}

/// Rate limit section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Successful `acquire()` calls permitted in any 60-second window,
    /// per provider. Zero blocks all acquisition until reconfigured.
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
        }
    }
}

/// Response cache section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether LM responses are memoized at all.
    pub enabled: bool,
    /// Per-entry time to live.
    pub ttl_seconds: u64,
    /// Entry-count cap for the in-memory tier.
    pub max_memory_entries: usize,
    /// Root directory of the disk tier.
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 86_400,
            max_memory_entries: 4_096,
            dir: PathBuf::from(".prompt-studio/cache"),
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter ("trace" | "debug" | "info" | "warn" | "error").
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// The single configuration document for the studio.
///
/// # Example document
///
/// ```json
/// {
///   "providers": {
///     "openai":    { "tokenizer": "cl100k_base",
///                    "pricing": { "input_per_1k": 0.0025, "output_per_1k": 0.01 } },
///     "anthropic": { "tokenizer": "cl100k_base",
///                    "pricing": { "input_per_1k": 0.003, "output_per_1k": 0.015 } },
///     "ollama":    { "endpoint": "http://localhost:11434", "tokenizer": "cl100k_base" }
///   },
///   "models": {
///     "gpt-4o": { "provider": "openai", "model": "gpt-4o" },
///     "llama3": { "provider": "ollama", "model": "llama3" }
///   },
///   "rate_limits": { "requests_per_minute": 60 },
///   "cache": { "enabled": true, "ttl_seconds": 86400,
///              "max_memory_entries": 4096, "dir": ".prompt-studio/cache" },
///   "logging": { "level": "info" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StudioConfig {
    /// Known providers, keyed by name.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,
    /// Target identifier to (provider, model) bindings.
    #[serde(default)]
    pub models: BTreeMap<String, ModelBinding>,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StudioConfig {
    /// Parse a configuration document from JSON text.
    pub fn from_json(text: &str) -> StudioResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| StudioError::configuration(format!("invalid config document: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from JSON and apply environment overrides.
    pub fn from_json_with_env(text: &str) -> StudioResult<Self> {
        let mut config = Self::from_json(text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// A configuration with the built-in provider set, suitable for tests
    /// and local development. Targets cover the closed [`TargetLm`] set.
    pub fn with_builtin_providers() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "openai".to_string(),
            ProviderEntry {
                endpoint: None,
                tokenizer: "cl100k_base".to_string(),
                pricing: Pricing {
                    input_per_1k: 0.0025,
                    output_per_1k: 0.01,
                },
            },
        );
        providers.insert(
            "anthropic".to_string(),
            ProviderEntry {
                endpoint: None,
                tokenizer: "cl100k_base".to_string(),
                pricing: Pricing {
                    input_per_1k: 0.003,
                    output_per_1k: 0.015,
                },
            },
        );
        providers.insert(
            "ollama".to_string(),
            ProviderEntry {
                endpoint: Some("http://localhost:11434".to_string()),
                tokenizer: "cl100k_base".to_string(),
                pricing: Pricing::default(),
            },
        );
        providers.insert(
            "stub".to_string(),
            ProviderEntry {
                endpoint: None,
                tokenizer: "cl100k_base".to_string(),
                pricing: Pricing::default(),
            },
        );

        let mut models = BTreeMap::new();
        let bind = |provider: &str, model: &str| ModelBinding {
            provider: provider.to_string(),
            model: model.to_string(),
        };
        models.insert("gpt-4o".to_string(), bind("openai", "gpt-4o"));
        models.insert("gpt-4o-mini".to_string(), bind("openai", "gpt-4o-mini"));
        models.insert("gpt-4-turbo".to_string(), bind("openai", "gpt-4-turbo"));
        models.insert(
            "claude-3-5-sonnet".to_string(),
            bind("anthropic", "claude-3-5-sonnet-20241022"),
        );
        models.insert(
            "claude-3-haiku".to_string(),
            bind("anthropic", "claude-3-haiku-20240307"),
        );
        models.insert("llama3".to_string(), bind("ollama", "llama3"));
        models.insert("mistral-7b".to_string(), bind("ollama", "mistral"));
        models.insert("local-stub".to_string(), bind("stub", "stub-v1"));

        Self {
            providers,
            models,
            ..Self::default()
        }
    }

    /// Resolve a closed target identifier to its configured binding.
    pub fn resolve_target(&self, target: TargetLm) -> StudioResult<&ModelBinding> {
        self.models.get(target.as_str()).ok_or_else(|| {
            StudioError::configuration(format!(
                "target '{}' has no model binding in the configuration",
                target.as_str()
            ))
        })
    }

    /// Reject structurally broken documents before anything uses them.
    pub fn validate(&self) -> StudioResult<()> {
        for (name, provider) in &self.providers {
            if provider.tokenizer.is_empty() {
                return Err(StudioError::configuration(format!(
                    "provider '{name}' has an empty tokenizer"
                )));
            }
            if provider.pricing.input_per_1k < 0.0 || provider.pricing.output_per_1k < 0.0 {
                return Err(StudioError::configuration(format!(
                    "provider '{name}' has negative pricing"
                )));
            }
        }
        for (target, binding) in &self.models {
            if !self.providers.contains_key(&binding.provider) {
                return Err(StudioError::configuration(format!(
                    "model '{target}' references unknown provider '{}'",
                    binding.provider
                )));
            }
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(StudioError::configuration(format!(
                    "unknown logging level '{other}'"
                )));
            }
        }
        Ok(())
    }

    /// Apply `PROMPT_STUDIO_*` environment overrides to the scalar fields.
    pub fn apply_env_overrides(&mut self) -> StudioResult<()> {
        if let Some(value) = read_env("rate_limits.requests_per_minute") {
            self.rate_limits.requests_per_minute = value
                .parse()
                .map_err(|_| bad_override("rate_limits.requests_per_minute", &value))?;
        }
        if let Some(value) = read_env("cache.enabled") {
            self.cache.enabled = value
                .parse()
                .map_err(|_| bad_override("cache.enabled", &value))?;
        }
        if let Some(value) = read_env("cache.ttl_seconds") {
            self.cache.ttl_seconds = value
                .parse()
                .map_err(|_| bad_override("cache.ttl_seconds", &value))?;
        }
        if let Some(value) = read_env("cache.max_memory_entries") {
            self.cache.max_memory_entries = value
                .parse()
                .map_err(|_| bad_override("cache.max_memory_entries", &value))?;
        }
        if let Some(value) = read_env("cache.dir") {
            self.cache.dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("logging.level") {
            self.logging.level = value;
        }
        Ok(())
    }
}

/// Environment variable name for a dotted config path.
pub fn env_var_name(dotted: &str) -> String {
    format!(
        "PROMPT_STUDIO_{}",
        dotted.to_uppercase().replace('.', "__")
    )
}

fn read_env(dotted: &str) -> Option<String> {
    let name = env_var_name(dotted);
    let value = std::env::var(&name).ok()?;
    log_debug!(var = %name, "Applying environment override");
    Some(value)
}

fn bad_override(dotted: &str, value: &str) -> StudioError {
    StudioError::configuration(format!(
        "environment override for '{dotted}' has unparseable value '{value}'"
    ))
}

/// The closed set of target LM identifiers accepted at the orchestrator
/// boundary.
///
/// Unknown names fail [`parse`](Self::parse) with a critical
/// [`StudioError::UnknownTarget`]. Resolution to a concrete provider and
/// model id goes through [`StudioConfig::resolve_target`], so a deployment
/// can rebind a target without widening the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetLm {
    Gpt4o,
    Gpt4oMini,
    Gpt4Turbo,
    Claude35Sonnet,
    Claude3Haiku,
    Llama3,
    Mistral7b,
    LocalStub,
}

impl TargetLm {
    /// All members, in declaration order.
    pub const ALL: [TargetLm; 8] = [
        TargetLm::Gpt4o,
        TargetLm::Gpt4oMini,
        TargetLm::Gpt4Turbo,
        TargetLm::Claude35Sonnet,
        TargetLm::Claude3Haiku,
        TargetLm::Llama3,
        TargetLm::Mistral7b,
        TargetLm::LocalStub,
    ];

    /// The canonical identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetLm::Gpt4o => "gpt-4o",
            TargetLm::Gpt4oMini => "gpt-4o-mini",
            TargetLm::Gpt4Turbo => "gpt-4-turbo",
            TargetLm::Claude35Sonnet => "claude-3-5-sonnet",
            TargetLm::Claude3Haiku => "claude-3-haiku",
            TargetLm::Llama3 => "llama3",
            TargetLm::Mistral7b => "mistral-7b",
            TargetLm::LocalStub => "local-stub",
        }
    }

    /// Parse an identifier from the closed set.
    pub fn parse(name: &str) -> StudioResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| StudioError::unknown_target(name))
    }
}

impl fmt::Display for TargetLm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
