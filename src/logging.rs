//! Logging utilities for prompt-studio.
//!
//! Re-exports tracing macros with log_* naming convention and provides the
//! process-level subscriber init driven by the configuration document.

// Re-export tracing macros with log_* naming
// Allow unused - these are available for internal use as needed
#[allow(unused_imports)]
pub use tracing::{
    debug as log_debug, error as log_error, info as log_info, trace as log_trace, warn as log_warn,
};

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `level` comes from `logging.level` in [`StudioConfig`](crate::StudioConfig)
/// ("trace" | "debug" | "info" | "warn" | "error"); the `RUST_LOG` environment
/// variable still takes precedence when set. Calling this twice is harmless:
/// the second install attempt is ignored.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
