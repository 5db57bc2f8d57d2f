use chrono::{DateTime, Utc};
use flowrun_types::WorkflowRunId;
use serde::{Deserialize, Serialize};

/// A granted lease on one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLease {
    pub run_id: WorkflowRunId,
    /// Unique per grant; release only succeeds with the current lease id.
    pub lease_id: String,
    /// Orchestrator instance holding the lease.
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RunLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
