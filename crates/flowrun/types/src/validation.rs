use crate::{RunStatus, WorkflowError, WorkflowResult};
use serde::{Deserialize, Serialize};

/// Outcome of checking a transition against the run state graph
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub from: RunStatus,
    pub to: RunStatus,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn valid(from: RunStatus, to: RunStatus) -> Self {
        Self {
            from,
            to,
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(from: RunStatus, to: RunStatus, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            valid: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Convert into `Err(InvalidStateTransition)` when the transition is not allowed.
    pub fn into_result(self) -> WorkflowResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(WorkflowError::InvalidStateTransition {
                from: self.from,
                to: self.to,
            })
        }
    }
}
