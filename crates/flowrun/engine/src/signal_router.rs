//! Extension point for signals admitted into a run

use async_trait::async_trait;
use flowrun_types::{Signal, WorkflowResult, WorkflowRun};

/// Receives every signal after it has been recorded in the run's history.
///
/// The orchestrator itself only records signals; a router decides what a
/// signal means for the node it targets.
#[async_trait]
pub trait SignalRouter: Send + Sync {
    async fn route(&self, run: &WorkflowRun, signal: &Signal) -> WorkflowResult<()>;
}
