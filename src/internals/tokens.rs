//! Token counting behind a provider-appropriate tokenizer.
//!
//! Counting matters in three places: context-window validation, cost
//! estimation, and the length-calibrated robustness mutators. The tokenizer
//! identity is part of the response-cache key bundle, so two providers
//! configured with different tokenizers never share cache entries.

use crate::error::{StudioError, StudioResult};
use crate::logging::log_warn;
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

/// Trait for counting tokens in text.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in a text string.
    fn count_tokens(&self, text: &str) -> StudioResult<u32>;

    /// Tokenizer identity ("cl100k_base", "o200k_base").
    fn tokenizer_id(&self) -> &'static str;

    /// Truncate text to fit within a token limit. Text that already fits is
    /// returned unchanged.
    fn truncate_to_limit(&self, text: &str, max_tokens: u32) -> StudioResult<String>;
}

/// A tiktoken-backed counter.
pub struct BpeTokenCounter {
    tokenizer: CoreBPE,
    id: &'static str,
}

impl std::fmt::Debug for BpeTokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeTokenCounter").field("id", &self.id).finish()
    }
}

impl BpeTokenCounter {
    /// Build a counter for a tokenizer name from the configuration document.
    ///
    /// Unknown names fall back to `cl100k_base` with a warning rather than
    /// failing the whole provider: an approximate count is still useful for
    /// padding calibration and cost estimates.
    pub fn for_tokenizer(name: &str) -> StudioResult<Self> {
        let (tokenizer, id) = match name {
            "o200k_base" => (
                o200k_base().map_err(|e| {
                    StudioError::configuration(format!("failed to initialize o200k_base: {e}"))
                })?,
                "o200k_base",
            ),
            "cl100k_base" => (
                cl100k_base().map_err(|e| {
                    StudioError::configuration(format!("failed to initialize cl100k_base: {e}"))
                })?,
                "cl100k_base",
            ),
            other => {
                log_warn!(tokenizer = %other, "Unknown tokenizer, falling back to cl100k_base");
                (
                    cl100k_base().map_err(|e| {
                        StudioError::configuration(format!("failed to initialize cl100k_base: {e}"))
                    })?,
                    "cl100k_base",
                )
            }
        };
        Ok(Self { tokenizer, id })
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count_tokens(&self, text: &str) -> StudioResult<u32> {
        let tokens = self.tokenizer.encode_with_special_tokens(text);
        Ok(tokens.len() as u32)
    }

    fn tokenizer_id(&self) -> &'static str {
        self.id
    }

    fn truncate_to_limit(&self, text: &str, max_tokens: u32) -> StudioResult<String> {
        let tokens = self.tokenizer.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens as usize {
            return Ok(text.to_string());
        }
        let truncated = &tokens[..max_tokens as usize];
        self.tokenizer.decode(truncated.to_vec()).map_err(|e| {
            StudioError::response_parsing(format!("failed to decode truncated tokens: {e}"))
        })
    }
}

/// Build a shared counter for a configured tokenizer name.
pub fn counter_for(name: &str) -> StudioResult<Arc<dyn TokenCounter>> {
    Ok(Arc::new(BpeTokenCounter::for_tokenizer(name)?))
}
