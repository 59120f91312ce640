//! Program specs: the DAG declaration of modules and edges constituting an
//! LM program.
//!
//! Modules live in a contiguous arena with stable indices; edges are index
//! pairs carrying field names. This keeps ownership flat, makes serialization
//! trivial, and lets validation walk the graph without reference cycles.

use crate::dataset::Example;
use crate::error::{StudioError, StudioResult};
use crate::signature::Signature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The closed set of module kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Predict,
    ChainOfThought,
    ReAct,
    Retrieve,
    ProgramOfThought,
    MultiChainComparison,
    Retry,
}

impl ModuleKind {
    /// Default input field names for a bare module of this kind.
    pub fn default_inputs(&self) -> Vec<String> {
        match self {
            ModuleKind::Retrieve => vec!["input".to_string()],
            _ => vec!["input".to_string()],
        }
    }

    /// Default output field names for a bare module of this kind.
    pub fn default_outputs(&self) -> Vec<String> {
        match self {
            ModuleKind::Retrieve => vec!["context".to_string()],
            ModuleKind::ChainOfThought => vec!["reasoning".to_string(), "output".to_string()],
            ModuleKind::ProgramOfThought => vec!["program".to_string(), "output".to_string()],
            _ => vec!["output".to_string()],
        }
    }
}

/// One module in the arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleNode {
    /// Unique within the spec; used as the tactic anchor.
    pub name: String,
    pub kind: ModuleKind,
    /// Content id of the signature bound to this step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_id: Option<String>,
    /// Kind-specific parameters (k for Retrieve, max_retries for Retry, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Input field names this module consumes.
    pub inputs: Vec<String>,
    /// Output field names this module produces.
    pub outputs: Vec<String>,
}

impl ModuleNode {
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            name: name.into(),
            kind,
            signature_id: None,
            params: BTreeMap::new(),
            inputs: kind.default_inputs(),
            outputs: kind.default_outputs(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// A data-flow edge: `producer.field -> consumer.field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub producer: usize,
    pub producer_field: String,
    pub consumer: usize,
    pub consumer_field: String,
}

/// Where a tactic lands relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TacticPosition {
    Before,
    After,
    Replace,
    Append,
}

/// A directed acyclic graph of modules.
///
/// Invariants enforced by [`validate`](Self::validate):
/// - no cycles;
/// - every consumer field is dataset-bound or produced upstream;
/// - exactly one terminal output-bearing module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProgramSpec {
    pub modules: Vec<ModuleNode>,
    pub edges: Vec<Edge>,
    /// Field names supplied by the dataset (e.g. "input", "context").
    pub dataset_fields: Vec<String>,
}

impl ProgramSpec {
    pub fn new(dataset_fields: Vec<String>) -> Self {
        Self {
            modules: Vec::new(),
            edges: Vec::new(),
            dataset_fields,
        }
    }

    /// Arena index of the module with this name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name == name)
    }

    /// Push a module and return its index.
    pub fn add_module(&mut self, module: ModuleNode) -> StudioResult<usize> {
        if self.index_of(&module.name).is_some() {
            return Err(StudioError::program_spec(format!(
                "duplicate module name '{}'",
                module.name
            )));
        }
        self.modules.push(module);
        Ok(self.modules.len() - 1)
    }

    /// Connect `producer.field -> consumer.field`.
    pub fn connect(
        &mut self,
        producer: usize,
        producer_field: &str,
        consumer: usize,
        consumer_field: &str,
    ) -> StudioResult<()> {
        let check = |idx: usize, field: &str, fields: fn(&ModuleNode) -> &Vec<String>| {
            self.modules
                .get(idx)
                .filter(|m| fields(m).iter().any(|f| f == field))
                .map(|_| ())
                .ok_or_else(|| {
                    StudioError::program_spec(format!("module {idx} has no field '{field}'"))
                })
        };
        check(producer, producer_field, |m| &m.outputs)?;
        check(consumer, consumer_field, |m| &m.inputs)?;
        self.edges.push(Edge {
            producer,
            producer_field: producer_field.to_string(),
            consumer,
            consumer_field: consumer_field.to_string(),
        });
        Ok(())
    }

    /// The indices of modules whose outputs nothing consumes.
    pub fn terminal_indices(&self) -> Vec<usize> {
        (0..self.modules.len())
            .filter(|&i| !self.edges.iter().any(|e| e.producer == i))
            .collect()
    }

    /// Validate the full DAG contract.
    pub fn validate(&self) -> StudioResult<()> {
        if self.modules.is_empty() {
            return Err(StudioError::program_spec("program has no modules"));
        }

        for edge in &self.edges {
            if edge.producer >= self.modules.len() || edge.consumer >= self.modules.len() {
                return Err(StudioError::program_spec(format!(
                    "edge references module index out of range: {} -> {}",
                    edge.producer, edge.consumer
                )));
            }
        }

        self.check_acyclic()?;

        // Every consumer field is dataset-bound or produced upstream.
        for (idx, module) in self.modules.iter().enumerate() {
            for input in &module.inputs {
                let wired = self
                    .edges
                    .iter()
                    .any(|e| e.consumer == idx && &e.consumer_field == input);
                let dataset_bound = self.dataset_fields.iter().any(|f| f == input);
                if !wired && !dataset_bound {
                    return Err(StudioError::program_spec(format!(
                        "field '{}.{input}' is neither dataset-bound nor produced upstream",
                        module.name
                    )));
                }
            }
        }

        let terminals = self.terminal_indices();
        if terminals.len() != 1 {
            return Err(StudioError::program_spec(format!(
                "program must have exactly one terminal module, found {}",
                terminals.len()
            )));
        }

        Ok(())
    }

    fn check_acyclic(&self) -> StudioResult<()> {
        // Kahn's algorithm over module-level edges.
        let n = self.modules.len();
        let mut indegree = vec![0usize; n];
        for edge in &self.edges {
            indegree[edge.consumer] += 1;
        }
        let mut queue: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut visited = 0usize;
        while let Some(node) = queue.pop() {
            visited += 1;
            for edge in self.edges.iter().filter(|e| e.producer == node) {
                indegree[edge.consumer] -= 1;
                if indegree[edge.consumer] == 0 {
                    queue.push(edge.consumer);
                }
            }
        }
        if visited != n {
            return Err(StudioError::program_spec("program graph contains a cycle"));
        }
        Ok(())
    }

    // =========================================================================
    // Tactics: structured graph edits used by the orchestrator
    // =========================================================================

    /// Insert, replace, or append a module relative to an anchor.
    ///
    /// Illegal positions are rejected: `before` a module with no upstream
    /// producer, `replace`/`before`/`after` without an anchor, and unknown
    /// anchors.
    pub fn apply_tactic(
        &mut self,
        module: ModuleNode,
        position: TacticPosition,
        anchor: Option<&str>,
    ) -> StudioResult<usize> {
        match position {
            TacticPosition::Append => self.append_module(module),
            TacticPosition::Before => {
                let anchor_idx = self.require_anchor(anchor)?;
                self.insert_before(module, anchor_idx)
            }
            TacticPosition::After => {
                let anchor_idx = self.require_anchor(anchor)?;
                self.insert_after(module, anchor_idx)
            }
            TacticPosition::Replace => {
                let anchor_idx = self.require_anchor(anchor)?;
                self.replace_module(module, anchor_idx)
            }
        }
    }

    fn require_anchor(&self, anchor: Option<&str>) -> StudioResult<usize> {
        let name = anchor
            .ok_or_else(|| StudioError::program_spec("tactic position requires an anchor"))?;
        self.index_of(name)
            .ok_or_else(|| StudioError::program_spec(format!("unknown anchor module '{name}'")))
    }

    fn append_module(&mut self, module: ModuleNode) -> StudioResult<usize> {
        let terminals = self.terminal_indices();
        let new_idx = self.add_module(module)?;
        if let Some(&terminal) = terminals.first() {
            let producer_field = self.modules[terminal]
                .outputs
                .last()
                .cloned()
                .ok_or_else(|| StudioError::program_spec("terminal module has no outputs"))?;
            let consumer_field = self.modules[new_idx]
                .inputs
                .first()
                .cloned()
                .ok_or_else(|| StudioError::program_spec("appended module has no inputs"))?;
            self.connect(terminal, &producer_field, new_idx, &consumer_field)?;
        }
        Ok(new_idx)
    }

    fn insert_before(&mut self, module: ModuleNode, anchor: usize) -> StudioResult<usize> {
        let incoming: Vec<usize> = self
            .edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.consumer == anchor)
            .map(|(i, _)| i)
            .collect();
        if incoming.is_empty() {
            return Err(StudioError::program_spec(format!(
                "cannot insert before '{}': it has no upstream producer",
                self.modules[anchor].name
            )));
        }

        let new_idx = self.add_module(module)?;
        let new_input = self.modules[new_idx]
            .inputs
            .first()
            .cloned()
            .ok_or_else(|| StudioError::program_spec("inserted module has no inputs"))?;
        let new_output = self.modules[new_idx]
            .outputs
            .last()
            .cloned()
            .ok_or_else(|| StudioError::program_spec("inserted module has no outputs"))?;

        // Redirect the anchor's incoming edges to the new module, then feed
        // the anchor from the new module's output.
        let mut anchor_input = None;
        for edge_idx in incoming {
            let edge = &mut self.edges[edge_idx];
            anchor_input.get_or_insert_with(|| edge.consumer_field.clone());
            edge.consumer = new_idx;
            edge.consumer_field = new_input.clone();
        }
        let anchor_input = anchor_input.unwrap_or_else(|| "input".to_string());
        self.edges.push(Edge {
            producer: new_idx,
            producer_field: new_output,
            consumer: anchor,
            consumer_field: anchor_input,
        });
        Ok(new_idx)
    }

    fn insert_after(&mut self, module: ModuleNode, anchor: usize) -> StudioResult<usize> {
        let outgoing: Vec<usize> = self
            .edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.producer == anchor)
            .map(|(i, _)| i)
            .collect();

        let new_idx = self.add_module(module)?;
        let new_input = self.modules[new_idx]
            .inputs
            .first()
            .cloned()
            .ok_or_else(|| StudioError::program_spec("inserted module has no inputs"))?;
        let new_output = self.modules[new_idx]
            .outputs
            .last()
            .cloned()
            .ok_or_else(|| StudioError::program_spec("inserted module has no outputs"))?;
        let anchor_output = self.modules[anchor]
            .outputs
            .last()
            .cloned()
            .ok_or_else(|| StudioError::program_spec("anchor module has no outputs"))?;

        // The new module takes over the anchor's consumers.
        for edge_idx in outgoing {
            let edge = &mut self.edges[edge_idx];
            edge.producer = new_idx;
            edge.producer_field = new_output.clone();
        }
        self.edges.push(Edge {
            producer: anchor,
            producer_field: anchor_output,
            consumer: new_idx,
            consumer_field: new_input,
        });
        Ok(new_idx)
    }

    fn replace_module(&mut self, mut module: ModuleNode, anchor: usize) -> StudioResult<usize> {
        if module.name != self.modules[anchor].name && self.index_of(&module.name).is_some() {
            return Err(StudioError::program_spec(format!(
                "duplicate module name '{}'",
                module.name
            )));
        }
        // Keep the wiring: the replacement inherits the anchor's field lists
        // so existing edges stay valid.
        module.inputs = self.modules[anchor].inputs.clone();
        module.outputs = self.modules[anchor].outputs.clone();
        self.modules[anchor] = module;
        Ok(anchor)
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Render the spec to executable form: a readable module listing with
    /// wiring comments, suitable for the artifact package's program file.
    pub fn render_code(&self, signatures: &BTreeMap<String, Signature>) -> String {
        let mut out = String::new();
        out.push_str("// Generated LM program\n");
        out.push_str(&format!(
            "// dataset fields: {}\n\n",
            self.dataset_fields.join(", ")
        ));
        for (idx, module) in self.modules.iter().enumerate() {
            let contract = module
                .signature_id
                .as_ref()
                .and_then(|id| signatures.get(id))
                .map(|s| s.summary())
                .unwrap_or_else(|| {
                    format!("{} -> {}", module.inputs.join(", "), module.outputs.join(", "))
                });
            out.push_str(&format!(
                "let {} = {:?}::new(\"{}\"); // {}\n",
                module.name.to_lowercase(),
                module.kind,
                contract,
                self.describe_wiring(idx)
            ));
        }
        let terminals = self.terminal_indices();
        if let Some(&t) = terminals.first() {
            out.push_str(&format!(
                "\n// terminal output: {}.{}\n",
                self.modules[t].name,
                self.modules[t].outputs.last().map(String::as_str).unwrap_or("output")
            ));
        }
        out
    }

    pub(crate) fn describe_wiring(&self, idx: usize) -> String {
        let feeds: Vec<String> = self
            .edges
            .iter()
            .filter(|e| e.consumer == idx)
            .map(|e| {
                format!(
                    "{}.{} -> {}",
                    self.modules[e.producer].name, e.producer_field, e.consumer_field
                )
            })
            .collect();
        if feeds.is_empty() {
            "fed by dataset".to_string()
        } else {
            feeds.join("; ")
        }
    }
}

/// A compiled program: the artifact an orchestration emits.
///
/// A pure function from dataset input to program output, reproducible given
/// the same LM binding and demonstrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledProgram {
    pub spec: ProgramSpec,
    /// Signatures referenced by the spec, keyed by content id.
    pub signatures: BTreeMap<String, Signature>,
    /// Demonstration exemplars selected by the optimizer.
    pub demonstrations: Vec<Example>,
    /// Optimizer kind that produced this program.
    pub optimizer: String,
    /// Optimizer parameters as configured.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optimizer_params: BTreeMap<String, serde_json::Value>,
    /// Metric the optimizer maximized.
    pub metric_name: String,
    /// Measured value of that metric on the dev split.
    pub metric_value: f64,
    /// Target LM identifier this program is bound to.
    pub target_lm: String,
    /// The spec rendered to executable form.
    pub program_code: String,
}
