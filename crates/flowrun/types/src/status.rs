//! Run lifecycle status and the allowed transition graph

use crate::WorkflowError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle status of a workflow run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Materialised but not yet started
    Created,
    /// Executing nodes
    Running,
    /// Paused, usually waiting on a node or an external signal
    Suspended,
    /// Finished successfully (terminal)
    Completed,
    /// Finished with an error (terminal)
    Failed,
    /// Aborted by a caller (terminal)
    #[serde(alias = "CANCELLED")]
    Canceled,
}

impl RunStatus {
    pub const ALL: [RunStatus; 6] = [
        RunStatus::Created,
        RunStatus::Running,
        RunStatus::Suspended,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::Canceled,
    ];

    /// Statuses from which a run can still move.
    pub const NON_TERMINAL: [RunStatus; 3] =
        [RunStatus::Created, RunStatus::Running, RunStatus::Suspended];

    /// Targets reachable in one step from this status.
    pub fn allowed_targets(self) -> &'static [RunStatus] {
        match self {
            RunStatus::Created => &[RunStatus::Running, RunStatus::Canceled],
            RunStatus::Running => &[
                RunStatus::Suspended,
                RunStatus::Completed,
                RunStatus::Failed,
                RunStatus::Canceled,
            ],
            RunStatus::Suspended => &[RunStatus::Running, RunStatus::Canceled],
            RunStatus::Completed | RunStatus::Failed | RunStatus::Canceled => &[],
        }
    }

    pub fn can_transition_to(self, to: RunStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Created => "CREATED",
            RunStatus::Running => "RUNNING",
            RunStatus::Suspended => "SUSPENDED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = WorkflowError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(RunStatus::Created),
            "RUNNING" => Ok(RunStatus::Running),
            "SUSPENDED" => Ok(RunStatus::Suspended),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            "CANCELED" | "CANCELLED" => Ok(RunStatus::Canceled),
            other => Err(WorkflowError::Validation(format!(
                "unknown run status `{other}`"
            ))),
        }
    }
}
