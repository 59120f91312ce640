//! Signatures: the typed input/output contract of a single LM step.
//!
//! A signature declares ordered input fields and ordered output fields.
//! Signatures are content-addressed: two signatures with the same field
//! schema share an id regardless of when or where they were built.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Semantic type of a signature field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    /// Short free text (a name, a query).
    String,
    /// Long free text (a document, an answer).
    Text,
    /// An ordered list of strings (retrieved passages).
    ListString,
    /// Arbitrary structured JSON.
    Json,
    /// A categorical label drawn from a closed set.
    Label,
    /// A numeric score.
    Score,
}

/// One field of a signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub semantic_type: SemanticType,
    pub description: String,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, ty: SemanticType, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            semantic_type: ty,
            description: desc.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, ty: SemanticType, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            semantic_type: ty,
            description: desc.into(),
            required: false,
        }
    }
}

/// The declarative contract of an LM step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub inputs: Vec<FieldSpec>,
    pub outputs: Vec<FieldSpec>,
    /// Natural-language instruction attached to the step.
    #[serde(default)]
    pub instruction: String,
}

impl Signature {
    pub fn new(inputs: Vec<FieldSpec>, outputs: Vec<FieldSpec>) -> Self {
        Self {
            inputs,
            outputs,
            instruction: String::new(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Content address: SHA-256 over the canonical field schema.
    ///
    /// The instruction participates too, so tuning an instruction produces a
    /// distinct artifact rather than silently shadowing the old one.
    pub fn content_id(&self) -> String {
        let mut hasher = Sha256::new();
        for (section, fields) in [("in", &self.inputs), ("out", &self.outputs)] {
            hasher.update(section.as_bytes());
            for field in fields.iter() {
                hasher.update(field.name.as_bytes());
                hasher.update([0x1f]);
                hasher.update(format!("{:?}", field.semantic_type).as_bytes());
                hasher.update([0x1f]);
                hasher.update([u8::from(field.required)]);
                hasher.update([0x1e]);
            }
        }
        hasher.update(self.instruction.as_bytes());
        let digest = hasher.finalize();
        format!("sig_{:x}", digest)[..20].to_string()
    }

    /// Whether an input field with this name exists.
    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|f| f.name == name)
    }

    /// Append an input field, returning the new content-addressed signature.
    pub fn with_input_field(&self, field: FieldSpec) -> Signature {
        let mut next = self.clone();
        next.inputs.push(field);
        next
    }

    /// Render the contract as a compact `in -> out` summary for logs and
    /// generated code headers.
    pub fn summary(&self) -> String {
        let names = |fields: &[FieldSpec]| {
            fields
                .iter()
                .map(|f| f.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!("{} -> {}", names(&self.inputs), names(&self.outputs))
    }
}
