//! Node execution results reported by the execution plane

use crate::{ErrorInfo, NodeId, WorkflowRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Final status of one node attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeResultStatus {
    Completed,
    Failed,
}

impl NodeResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeResultStatus::Completed => "COMPLETED",
            NodeResultStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for NodeResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing one attempt of one node, as reported by an executor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub run_id: WorkflowRunId,
    pub node_id: NodeId,
    /// Ordinal retry count, starting at 1
    pub attempt: u32,
    pub status: NodeResultStatus,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub finished_at: DateTime<Utc>,
}

impl NodeExecutionResult {
    /// A successful result with no outputs yet
    pub fn completed(run_id: WorkflowRunId, node_id: NodeId, attempt: u32) -> Self {
        Self {
            run_id,
            node_id,
            attempt,
            status: NodeResultStatus::Completed,
            outputs: BTreeMap::new(),
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// A failed result carrying the executor's error
    pub fn failed(run_id: WorkflowRunId, node_id: NodeId, attempt: u32, error: ErrorInfo) -> Self {
        Self {
            run_id,
            node_id,
            attempt,
            status: NodeResultStatus::Failed,
            outputs: BTreeMap::new(),
            error: Some(error),
            finished_at: Utc::now(),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    pub fn with_finished_at(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = finished_at;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeResultStatus::Completed
    }
}

/// Latest applied result for a node, kept on the run aggregate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRunState {
    pub attempt: u32,
    pub status: NodeResultStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub recorded_at: DateTime<Utc>,
}

/// What `handle_node_result` did with a delivery
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeResultOutcome {
    /// The result was applied to the run
    Applied,
    /// The (run, node, attempt) key was already processed; nothing changed
    Duplicate,
}

impl NodeResultOutcome {
    pub fn is_duplicate(self) -> bool {
        self == NodeResultOutcome::Duplicate
    }
}
