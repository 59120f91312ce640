//! Datasets of labeled (or unlabeled) examples.
//!
//! A dataset is an ordered sequence of examples with a name and a version.
//! Datasets are immutable once a run references them; edits produce a new
//! version. The on-disk JSON document and the CSV form both parse into the
//! same structures, and `parse(serialize(d)) == d` structurally.
//!
//! # JSON document
//!
//! ```json
//! { "task_name": "qa", "schema_version": "1.0",
//!   "examples": [
//!     { "input": { "text": "2+2=?" }, "ideal_output": { "label": "4" } }
//!   ] }
//! ```
//!
//! # CSV form
//!
//! Columns `input, expected_output, <metadata…>`; the first row is the
//! header; unknown columns become string metadata.

use crate::error::{StudioError, StudioResult};
use crate::logging::log_debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Supported schema version of the dataset document.
pub const SCHEMA_VERSION: &str = "1.0";

/// Minimum dataset size accepted for orchestrated compilation.
pub const MIN_EXAMPLES_FOR_COMPILATION: usize = 5;

/// Context attached to an example input: a single passage or several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Single(String),
    Many(Vec<String>),
}

impl ContextValue {
    /// All context passages, flattened.
    pub fn passages(&self) -> Vec<&str> {
        match self {
            ContextValue::Single(s) => vec![s.as_str()],
            ContextValue::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// The structured input of one example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleInput {
    /// The primary input text. Invariant: non-empty.
    pub text: String,
    /// Optional retrieval context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextValue>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// The expected output of one example. Absence selects label-free metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdealOutput {
    /// Text, categorical, numeric, boolean, or structured label.
    pub label: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl IdealOutput {
    /// The label rendered as comparison text: strings verbatim, everything
    /// else in its JSON form.
    pub fn label_text(&self) -> String {
        match &self.label {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One input/expected-output pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input: ExampleInput,
    #[serde(
        default,
        rename = "ideal_output",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected: Option<IdealOutput>,
}

impl Example {
    /// Build a labeled example from plain text.
    pub fn labeled(input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            input: ExampleInput {
                text: input.into(),
                context: None,
                metadata: BTreeMap::new(),
            },
            expected: Some(IdealOutput {
                label: serde_json::Value::String(expected.into()),
                explanation: None,
            }),
        }
    }

    /// Build an unlabeled example from plain text.
    pub fn unlabeled(input: impl Into<String>) -> Self {
        Self {
            input: ExampleInput {
                text: input.into(),
                context: None,
                metadata: BTreeMap::new(),
            },
            expected: None,
        }
    }

    /// Expected output rendered as text, if labeled.
    pub fn expected_text(&self) -> Option<String> {
        self.expected.as_ref().map(IdealOutput::label_text)
    }
}

/// Ratios for a deterministic train/dev/test split. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub dev: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.6,
            dev: 0.2,
            test: 0.2,
        }
    }
}

impl SplitRatios {
    fn validate(&self) -> StudioResult<()> {
        let sum = self.train + self.dev + self.test;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(StudioError::validation(format!(
                "split ratios must sum to 1.0, got {sum}"
            )));
        }
        if self.train < 0.0 || self.dev < 0.0 || self.test < 0.0 {
            return Err(StudioError::validation("split ratios must be non-negative"));
        }
        Ok(())
    }
}

/// The derived splits of a dataset. Ordering inside each split follows the
/// seeded shuffle, so the same `(seed, ratios)` always reproduces the same
/// partition.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplits {
    pub train: Vec<Example>,
    pub dev: Vec<Example>,
    pub test: Vec<Example>,
}

/// Named, versioned, ordered sequence of examples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Task name from the source document.
    pub name: String,
    /// Linear version; edits produce a new version, never a mutation.
    #[serde(default = "default_version")]
    pub version: u32,
    pub examples: Vec<Example>,
}

fn default_version() -> u32 {
    1
}

impl Dataset {
    pub fn new(name: impl Into<String>, examples: Vec<Example>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            examples,
        }
    }

    /// Stable identifier: name plus version.
    pub fn id(&self) -> String {
        format!("{}@v{}", self.name, self.version)
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Check the dataset invariant: every example has non-empty input text.
    pub fn validate(&self) -> StudioResult<()> {
        for (i, example) in self.examples.iter().enumerate() {
            if example.input.text.trim().is_empty() {
                return Err(StudioError::dataset_schema(format!(
                    "example {i} has empty input text"
                )));
            }
        }
        Ok(())
    }

    /// Additionally require the minimum size for orchestrated compilation.
    pub fn validate_for_compilation(&self) -> StudioResult<()> {
        self.validate()?;
        if self.examples.len() < MIN_EXAMPLES_FOR_COMPILATION {
            return Err(StudioError::dataset_schema(format!(
                "orchestrated compilation needs at least {MIN_EXAMPLES_FOR_COMPILATION} examples, got {}",
                self.examples.len()
            )));
        }
        Ok(())
    }

    /// A new version of this dataset with replaced examples.
    pub fn next_version(&self, examples: Vec<Example>) -> Self {
        Self {
            name: self.name.clone(),
            version: self.version + 1,
            examples,
        }
    }

    /// Derive train/dev/test splits deterministically from a seed.
    ///
    /// The shuffle is a seeded Fisher-Yates; boundaries are
    /// `floor(n * train)` and `floor(n * (train + dev))`, with the test
    /// split taking the remainder.
    pub fn split(&self, seed: u64, ratios: SplitRatios) -> StudioResult<DatasetSplits> {
        ratios.validate()?;

        let mut indices: Vec<usize> = (0..self.examples.len()).collect();
        let mut rng = fastrand::Rng::with_seed(seed);
        // Fisher-Yates
        for i in (1..indices.len()).rev() {
            let j = rng.usize(0..=i);
            indices.swap(i, j);
        }

        let n = indices.len();
        let train_end = (n as f64 * ratios.train).floor() as usize;
        let dev_end = (n as f64 * (ratios.train + ratios.dev)).floor() as usize;

        let pick = |range: &[usize]| -> Vec<Example> {
            range.iter().map(|&i| self.examples[i].clone()).collect()
        };

        log_debug!(
            dataset = %self.name,
            total = n,
            train = train_end,
            dev = dev_end - train_end,
            test = n - dev_end,
            seed = seed,
            "Derived dataset splits"
        );

        Ok(DatasetSplits {
            train: pick(&indices[..train_end]),
            dev: pick(&indices[train_end..dev_end]),
            test: pick(&indices[dev_end..]),
        })
    }

    // =========================================================================
    // Serialization: the §-style JSON document and the CSV form
    // =========================================================================

    /// Parse the JSON dataset document.
    pub fn from_json(text: &str) -> StudioResult<Self> {
        let doc: DatasetDocument = serde_json::from_str(text)
            .map_err(|e| StudioError::dataset_schema(format!("invalid dataset document: {e}")))?;
        if doc.schema_version != SCHEMA_VERSION {
            return Err(StudioError::dataset_schema(format!(
                "unsupported schema_version '{}'",
                doc.schema_version
            )));
        }
        let dataset = Self {
            name: doc.task_name,
            version: doc.version,
            examples: doc.examples,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Serialize to the JSON dataset document.
    pub fn to_json(&self) -> StudioResult<String> {
        let doc = DatasetDocument {
            task_name: self.name.clone(),
            schema_version: SCHEMA_VERSION.to_string(),
            version: self.version,
            examples: self.examples.clone(),
        };
        serde_json::to_string_pretty(&doc)
            .map_err(|e| StudioError::dataset_schema(format!("serialization failed: {e}")))
    }

    /// Parse the CSV form: header `input, expected_output, <metadata…>`.
    ///
    /// An empty `expected_output` cell yields an unlabeled example; every
    /// other column lands in the example's metadata as a string.
    pub fn from_csv(name: impl Into<String>, text: &str) -> StudioResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| StudioError::dataset_schema(format!("invalid CSV header: {e}")))?
            .clone();

        let input_col = headers
            .iter()
            .position(|h| h == "input")
            .ok_or_else(|| StudioError::dataset_schema("CSV is missing an 'input' column"))?;
        let expected_col = headers.iter().position(|h| h == "expected_output");

        let mut examples = Vec::new();
        for (row_idx, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                StudioError::dataset_schema(format!("invalid CSV row {}: {e}", row_idx + 1))
            })?;

            let input_text = record.get(input_col).unwrap_or_default().to_string();
            let expected = expected_col
                .and_then(|c| record.get(c))
                .filter(|s| !s.is_empty())
                .map(|s| IdealOutput {
                    label: serde_json::Value::String(s.to_string()),
                    explanation: None,
                });

            let mut metadata = BTreeMap::new();
            for (col, header) in headers.iter().enumerate() {
                if col == input_col || Some(col) == expected_col {
                    continue;
                }
                if let Some(value) = record.get(col) {
                    if !value.is_empty() {
                        metadata.insert(
                            header.to_string(),
                            serde_json::Value::String(value.to_string()),
                        );
                    }
                }
            }

            examples.push(Example {
                input: ExampleInput {
                    text: input_text,
                    context: None,
                    metadata,
                },
                expected,
            });
        }

        let dataset = Self::new(name, examples);
        dataset.validate()?;
        Ok(dataset)
    }
}

/// The wire shape of the dataset document (§ dataset file format).
#[derive(Debug, Serialize, Deserialize)]
struct DatasetDocument {
    task_name: String,
    schema_version: String,
    #[serde(default = "default_version")]
    version: u32,
    examples: Vec<Example>,
}
