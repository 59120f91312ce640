//! Error types for prompt-studio operations.
//!
//! One crate-wide error enum covers every failure mode: input validation,
//! provider transport, cache and store I/O, optimizer failures, and program
//! spec violations. Each variant can be:
//! - Categorized via [`category()`](StudioError::category) for routing
//! - Assessed via [`severity()`](StudioError::severity) for logging/alerting
//! - Checked via [`is_retryable()`](StudioError::is_retryable) by the retry executor
//!
//! # Creating errors
//!
//! Use the constructor methods, which log at the appropriate level:
//!
//! ```rust
//! use prompt_studio::StudioError;
//!
//! let err = StudioError::validation("temperature must be within [0, 2]");
//! let err = StudioError::rate_limited(30);
//! let err = StudioError::timeout(60);
//! ```

use crate::logging::{log_error, log_warn};
use thiserror::Error;

/// Convenient result type for studio operations.
pub type StudioResult<T> = std::result::Result<T, StudioError>;

/// High-level categorization of errors for routing and handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The caller made a mistake it can fix (bad parameters, auth, config).
    Client,
    /// The LM backend or filesystem failed; may indicate an outage.
    External,
    /// Temporary failures that the retry executor may re-attempt.
    Transient,
    /// Bugs and invariant violations inside the studio itself.
    Internal,
}

/// Severity level for logging and alerting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// System unusable or data integrity at risk.
    Critical,
    /// Action failed but the system is stable.
    Error,
    /// Unexpected but recoverable.
    Warning,
    /// Expected failure (validation, not-found).
    Info,
}

/// Errors that can occur during studio operations.
///
/// | Variant | Category | Retryable |
/// |---------|----------|-----------|
/// | `Validation` | Client | No |
/// | `DatasetSchema` | Client | No |
/// | `UnsupportedProvider` | Client | No |
/// | `UnknownTarget` | Client | No |
/// | `Configuration` | Client | No |
/// | `RequestFailed` | External | Yes |
/// | `ResponseParsing` | External | No |
/// | `RateLimited` | Transient | Yes |
/// | `Timeout` | Transient | Yes |
/// | `AuthenticationFailed` | Client | No |
/// | `TokenLimitExceeded` | Client | No |
/// | `ProgramSpec` | Client | No |
/// | `Optimizer` | Internal | No |
/// | `Store` | External | No |
#[derive(Error, Debug)]
pub enum StudioError {
    /// Malformed input to an operation; rejected locally, never retried.
    #[error("Validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// A dataset violated its schema (empty input text, bad ratios, short file).
    #[error("Dataset schema violation: {message}")]
    DatasetSchema {
        /// Description of the violation.
        message: String,
    },

    /// The specified provider is not supported.
    #[error("Provider not supported: {provider}")]
    UnsupportedProvider {
        /// The provider name that was requested.
        provider: String,
    },

    /// The target LM identifier is outside the closed set.
    #[error("Unknown target LM: {target}")]
    UnknownTarget {
        /// The identifier that failed to resolve.
        target: String,
    },

    /// Configuration is invalid or incomplete.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The request to the provider failed (network reset, 5xx).
    #[error("Request failed: {message}")]
    RequestFailed {
        /// Description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The provider returned a response that couldn't be parsed.
    #[error("Response parsing failed: {message}")]
    ResponseParsing {
        /// Details about the parsing failure.
        message: String,
    },

    /// The backend returned 429; wait before retrying.
    #[error("Rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimited {
        /// Recommended wait before retrying.
        retry_after_seconds: u64,
    },

    /// The request did not complete within the configured timeout.
    #[error("Request timed out after {timeout_seconds}s")]
    Timeout {
        /// The timeout that was exceeded.
        timeout_seconds: u64,
    },

    /// Credentials were rejected; not retryable without fixing them.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Details about the authentication failure.
        message: String,
    },

    /// The input exceeds the model's context window.
    #[error("Token limit exceeded: {current} > {max}")]
    TokenLimitExceeded {
        /// Actual token count of the request.
        current: usize,
        /// Maximum allowed tokens for the model.
        max: usize,
    },

    /// A program spec violated its invariants (cycle, unbound field,
    /// multiple terminals, illegal tactic position).
    #[error("Program spec invalid: {message}")]
    ProgramSpec {
        /// Which invariant was violated.
        message: String,
    },

    /// The optimizer failed: internal exception, no viable candidate,
    /// or a signature/dataset mismatch discovered mid-compilation.
    #[error("Optimizer failed: {message}")]
    Optimizer {
        /// Captured failure detail; fed into failure analysis.
        message: String,
    },

    /// The history store could not read or write a record.
    #[error("Store operation failed: {message}")]
    Store {
        /// Description of the failure.
        message: String,
        /// The underlying I/O error, if available.
        #[source]
        source: Option<std::io::Error>,
    },
}

impl StudioError {
    /// Get the error category for routing decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Client,
            Self::DatasetSchema { .. } => ErrorCategory::Client,
            Self::UnsupportedProvider { .. } => ErrorCategory::Client,
            Self::UnknownTarget { .. } => ErrorCategory::Client,
            Self::Configuration { .. } => ErrorCategory::Client,
            Self::RequestFailed { .. } => ErrorCategory::External,
            Self::ResponseParsing { .. } => ErrorCategory::External,
            Self::RateLimited { .. } => ErrorCategory::Transient,
            Self::Timeout { .. } => ErrorCategory::Transient,
            Self::AuthenticationFailed { .. } => ErrorCategory::Client,
            Self::TokenLimitExceeded { .. } => ErrorCategory::Client,
            Self::ProgramSpec { .. } => ErrorCategory::Client,
            Self::Optimizer { .. } => ErrorCategory::Internal,
            Self::Store { .. } => ErrorCategory::External,
        }
    }

    /// Get the error severity for logging and alerting.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Validation { .. } => ErrorSeverity::Info,
            Self::DatasetSchema { .. } => ErrorSeverity::Info,
            Self::UnsupportedProvider { .. } => ErrorSeverity::Error,
            Self::UnknownTarget { .. } => ErrorSeverity::Critical,
            Self::Configuration { .. } => ErrorSeverity::Error,
            Self::RequestFailed { .. } => ErrorSeverity::Error,
            Self::ResponseParsing { .. } => ErrorSeverity::Warning,
            Self::RateLimited { .. } => ErrorSeverity::Warning,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::AuthenticationFailed { .. } => ErrorSeverity::Error,
            Self::TokenLimitExceeded { .. } => ErrorSeverity::Info,
            Self::ProgramSpec { .. } => ErrorSeverity::Warning,
            Self::Optimizer { .. } => ErrorSeverity::Error,
            Self::Store { .. } => ErrorSeverity::Error,
        }
    }

    /// Whether this error is transient and should trigger a retry.
    ///
    /// Returns `true` for rate limits, timeouts, and general request
    /// failures (which may be network issues). Everything else surfaces
    /// immediately to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::RequestFailed { .. }
        )
    }

    // =========================================================================
    // Constructor methods with automatic logging
    // =========================================================================

    /// Create a validation error (logs at WARN level).
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(
            error_type = "validation",
            message = %message,
            "Input validation failed"
        );
        Self::Validation { message }
    }

    /// Create a dataset schema error (logs at WARN level).
    pub fn dataset_schema(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(
            error_type = "dataset_schema",
            message = %message,
            "Dataset schema violation"
        );
        Self::DatasetSchema { message }
    }

    /// Create an unsupported provider error (logs at ERROR level).
    pub fn unsupported_provider(provider: impl Into<String>) -> Self {
        let provider = provider.into();
        log_error!(
            provider = %provider,
            error_type = "unsupported_provider",
            "Unsupported LM provider requested"
        );
        Self::UnsupportedProvider { provider }
    }

    /// Create an unknown target error (logs at ERROR level).
    pub fn unknown_target(target: impl Into<String>) -> Self {
        let target = target.into();
        log_error!(
            target = %target,
            error_type = "invalid_format",
            "Target LM identifier outside the closed set"
        );
        Self::UnknownTarget { target }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "configuration",
            message = %message,
            "Configuration validation failed"
        );
        Self::Configuration { message }
    }

    pub fn request_failed(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let message = message.into();
        log_error!(
            error_type = "request_failed",
            message = %message,
            has_source = source.is_some(),
            "LM request execution failed"
        );
        Self::RequestFailed { message, source }
    }

    pub fn response_parsing(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(
            error_type = "response_parsing",
            message = %message,
            "LM response format invalid"
        );
        Self::ResponseParsing { message }
    }

    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        log_warn!(
            error_type = "rate_limited",
            retry_after_seconds = retry_after_seconds,
            "Provider rate limit exceeded"
        );
        Self::RateLimited {
            retry_after_seconds,
        }
    }

    pub fn timeout(timeout_seconds: u64) -> Self {
        log_warn!(
            error_type = "timeout",
            timeout_seconds = timeout_seconds,
            "LM request timed out"
        );
        Self::Timeout { timeout_seconds }
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "authentication_failed",
            message = %message,
            "Provider authentication failed"
        );
        Self::AuthenticationFailed { message }
    }

    pub fn token_limit_exceeded(current: usize, max: usize) -> Self {
        log_warn!(
            error_type = "token_limit_exceeded",
            current_tokens = current,
            max_tokens = max,
            "Request exceeds model token limit"
        );
        Self::TokenLimitExceeded { current, max }
    }

    pub fn program_spec(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(
            error_type = "program_spec",
            message = %message,
            "Program spec invariant violated"
        );
        Self::ProgramSpec { message }
    }

    pub fn optimizer(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "optimizer",
            message = %message,
            "Optimizer run failed"
        );
        Self::Optimizer { message }
    }

    pub fn store(message: impl Into<String>, source: Option<std::io::Error>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "store",
            message = %message,
            has_source = source.is_some(),
            "History store operation failed"
        );
        Self::Store { message, source }
    }
}
