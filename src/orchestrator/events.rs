//! Step event streaming.
//!
//! The orchestrator publishes a monotone sequence of step events through a
//! bounded channel. Publishing never blocks the agent loop: when a slow
//! consumer fills the buffer, the newest event is dropped. Consumers that
//! reconnect lose intermediate events; delivery is best-effort.

use crate::logging::log_trace;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Lifecycle of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Error,
}

/// One entry of the step trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    /// Monotone per orchestration, starting at 1.
    pub id: u64,
    /// Human-readable step name.
    pub name: String,
    /// Tool that ran, when the step wrapped a tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Non-blocking publisher side of the step channel.
#[derive(Debug, Clone)]
pub struct StepSink {
    tx: mpsc::Sender<StepEvent>,
}

impl StepSink {
    /// A sink/receiver pair with the given buffer capacity.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StepEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Publish one event. Drop-newest on overflow; never blocks.
    pub fn publish(&self, event: StepEvent) {
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.tx.try_send(event) {
            log_trace!(step_id = dropped.id, "Step buffer full, dropping newest event");
        }
    }
}

/// Collects the step trace and mirrors it to an optional sink.
#[derive(Debug, Default)]
pub struct StepRecorder {
    steps: Vec<StepEvent>,
    sink: Option<StepSink>,
    next_id: u64,
}

impl StepRecorder {
    pub fn new(sink: Option<StepSink>) -> Self {
        Self {
            steps: Vec::new(),
            sink,
            next_id: 1,
        }
    }

    /// Record a completed step and publish it.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        name: impl Into<String>,
        tool: Option<String>,
        status: StepStatus,
        thought: Option<String>,
        action: Option<String>,
        observation: Option<String>,
        duration_ms: u64,
        error: Option<String>,
    ) {
        let event = StepEvent {
            id: self.next_id,
            name: name.into(),
            tool,
            status,
            thought,
            action,
            observation,
            duration_ms: Some(duration_ms),
            error,
            timestamp: Utc::now(),
        };
        self.next_id += 1;
        if let Some(sink) = &self.sink {
            sink.publish(event.clone());
        }
        self.steps.push(event);
    }

    /// The full ordered trace.
    pub fn into_steps(self) -> Vec<StepEvent> {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
