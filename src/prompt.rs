//! Versioned prompt records.
//!
//! A prompt is the unit the evaluation engine scores and the store tracks
//! over time. Versioning is linear per id; `parent_id` allows branching a
//! variant off an existing prompt. Status moves forward only
//! (Draft → Testing → Production → Archived) except for explicit rollback.

use crate::error::{StudioError, StudioResult};
use crate::logging::log_info;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    Draft,
    Testing,
    Production,
    Archived,
}

/// A prompt template. `{input}` in the text is replaced with the example
/// input at render time; `{context}` with the joined context passages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    /// Linear version per id.
    pub version: u32,
    /// Invariant: non-empty.
    pub text: String,
    /// Free-form grouping (e.g. "support", "extraction").
    pub category: String,
    /// Prompting technique tag (e.g. "chain_of_thought", "few_shot").
    pub technique: String,
    pub status: PromptStatus,
    /// Present when this prompt branched off another.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Prompt {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> StudioResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(StudioError::validation("prompt text must be non-empty"));
        }
        Ok(Self {
            id: id.into(),
            version: 1,
            text,
            category: "general".to_string(),
            technique: "zero_shot".to_string(),
            status: PromptStatus::Draft,
            parent_id: None,
        })
    }

    /// Produce the next linear version with new text. The predecessor is
    /// never mutated.
    pub fn next_version(&self, text: impl Into<String>) -> StudioResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(StudioError::validation("prompt text must be non-empty"));
        }
        Ok(Self {
            version: self.version + 1,
            text,
            ..self.clone()
        })
    }

    /// Branch a variant under a new id, recording this prompt as parent.
    pub fn branch(&self, id: impl Into<String>, text: impl Into<String>) -> StudioResult<Self> {
        let mut child = Self::new(id, text)?;
        child.category = self.category.clone();
        child.technique = self.technique.clone();
        child.parent_id = Some(self.id.clone());
        Ok(child)
    }

    /// Advance the status. Transitions are monotone; moving backwards
    /// requires [`rollback_status`](Self::rollback_status).
    pub fn advance_status(&mut self, next: PromptStatus) -> StudioResult<()> {
        if next <= self.status {
            return Err(StudioError::validation(format!(
                "status transition {:?} -> {:?} is not monotone",
                self.status, next
            )));
        }
        log_info!(prompt_id = %self.id, from = ?self.status, to = ?next, "Prompt status advanced");
        self.status = next;
        Ok(())
    }

    /// Explicit rollback: the only sanctioned backwards status move.
    pub fn rollback_status(&mut self, previous: PromptStatus) {
        log_info!(
            prompt_id = %self.id,
            from = ?self.status,
            to = ?previous,
            "Prompt status rolled back"
        );
        self.status = previous;
    }

    /// Render the template against an example input.
    pub fn render(&self, input_text: &str, context: Option<&str>) -> String {
        let mut rendered = self.text.replace("{input}", input_text);
        if let Some(ctx) = context {
            rendered = rendered.replace("{context}", ctx);
        }
        rendered
    }
}
