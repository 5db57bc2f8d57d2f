//! Saga compensation contract
//!
//! The orchestrator does not know how to undo work. When a run fails it hands
//! the failed run to a [`CompensationCoordinator`] before persisting the
//! failure.

use async_trait::async_trait;
use flowrun_types::WorkflowRun;
use thiserror::Error;

/// Why a compensation pass failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompensationError {
    #[error("compensation step for node '{node_id}' failed: {message}")]
    StepFailed { node_id: String, message: String },

    #[error("compensation unavailable: {0}")]
    Unavailable(String),
}

/// Rolls back the side effects of a failed run
#[async_trait]
pub trait CompensationCoordinator: Send + Sync {
    async fn compensate(&self, run: &WorkflowRun) -> Result<(), CompensationError>;
}

/// Coordinator for deployments with nothing to roll back
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCompensationCoordinator;

#[async_trait]
impl CompensationCoordinator for NoopCompensationCoordinator {
    async fn compensate(&self, run: &WorkflowRun) -> Result<(), CompensationError> {
        tracing::debug!(run_id = %run.id, "No compensation configured");
        Ok(())
    }
}
