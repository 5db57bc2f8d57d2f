//! Error types for the run orchestrator

use crate::{RunStatus, WorkflowDefinitionId, WorkflowRunId};
use serde::{Deserialize, Serialize};

/// Error reported by a failed node or attached to a failed run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Errors that can occur in orchestrator operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow run not found: {0}")]
    RunNotFound(WorkflowRunId),

    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(WorkflowDefinitionId),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: RunStatus, to: RunStatus },

    #[error("Workflow run {run_id} does not accept node results in status {status}")]
    RunNotActive {
        run_id: WorkflowRunId,
        status: RunStatus,
    },

    /// Bad executor signature or callback token. Callers should not echo the
    /// detail back to the untrusted party.
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Timed out after {waited_ms}ms waiting for the lock on run {run_id}")]
    LockTimeout {
        run_id: WorkflowRunId,
        waited_ms: u64,
    },

    #[error("Compensation failed for run {run_id}: {message}")]
    CompensationFailure {
        run_id: WorkflowRunId,
        message: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl WorkflowError {
    /// Whether the caller may retry the same operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::LockTimeout { .. })
    }

    pub fn is_security_violation(&self) -> bool {
        matches!(self, WorkflowError::SecurityViolation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            WorkflowError::RunNotFound(_) | WorkflowError::DefinitionNotFound(_)
        )
    }
}

/// Result type alias for orchestrator operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
