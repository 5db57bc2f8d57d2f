//! Execution history: the append-only audit log of a run
//!
//! Every lifecycle or feedback operation appends exactly one event while it
//! holds the run's lock, so the per-run sequence reflects the order in which
//! operations were serialized.

use crate::{WorkflowError, WorkflowRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Kind of history event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionEventType {
    RunCreated,
    StatusChanged,
    NodeCompleted,
    RunCompleted,
    RunFailed,
    CompensationFailed,
    SignalReceived,
}

impl ExecutionEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionEventType::RunCreated => "RUN_CREATED",
            ExecutionEventType::StatusChanged => "STATUS_CHANGED",
            ExecutionEventType::NodeCompleted => "NODE_COMPLETED",
            ExecutionEventType::RunCompleted => "RUN_COMPLETED",
            ExecutionEventType::RunFailed => "RUN_FAILED",
            ExecutionEventType::CompensationFailed => "COMPENSATION_FAILED",
            ExecutionEventType::SignalReceived => "SIGNAL_RECEIVED",
        }
    }
}

impl std::fmt::Display for ExecutionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionEventType {
    type Err = WorkflowError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "RUN_CREATED" => Ok(ExecutionEventType::RunCreated),
            "STATUS_CHANGED" => Ok(ExecutionEventType::StatusChanged),
            "NODE_COMPLETED" => Ok(ExecutionEventType::NodeCompleted),
            "RUN_COMPLETED" => Ok(ExecutionEventType::RunCompleted),
            "RUN_FAILED" => Ok(ExecutionEventType::RunFailed),
            "COMPENSATION_FAILED" => Ok(ExecutionEventType::CompensationFailed),
            "SIGNAL_RECEIVED" => Ok(ExecutionEventType::SignalReceived),
            other => Err(WorkflowError::Validation(format!(
                "unknown execution event type `{other}`"
            ))),
        }
    }
}

/// Append payload. The sequence number is assigned by storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventAppend {
    pub run_id: WorkflowRunId,
    pub event_type: ExecutionEventType,
    pub message: String,
    #[serde(default)]
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

/// A stored history event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Position within the run's history, starting at 1
    pub sequence: u64,
    pub run_id: WorkflowRunId,
    pub event_type: ExecutionEventType,
    pub message: String,
    #[serde(default)]
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionEvent {
    /// Read a string field out of the event metadata
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Ordered history of one run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    pub run_id: WorkflowRunId,
    pub events: Vec<ExecutionEvent>,
}

impl ExecutionHistory {
    pub fn new(run_id: WorkflowRunId, events: Vec<ExecutionEvent>) -> Self {
        Self { run_id, events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&ExecutionEvent> {
        self.events.last()
    }

    /// Events of one type, in history order
    pub fn of_type(&self, event_type: ExecutionEventType) -> Vec<&ExecutionEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn count_of(&self, event_type: ExecutionEventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}
