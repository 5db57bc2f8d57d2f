use crate::model::RunLease;
use crate::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowrun_types::{
    CallbackRegistration, EventAppend, ExecutionEvent, ExecutionToken, NodeId, RunQuery,
    TenantId, WorkflowRun, WorkflowRunId,
};

/// Storage interface for run aggregates.
#[async_trait]
pub trait WorkflowRunStore: Send + Sync {
    /// Insert a new run. Fails with `Conflict` if the id is taken.
    async fn insert_run(&self, run: &WorkflowRun) -> StorageResult<()>;

    /// Replace a stored run. The stored version must be exactly
    /// `run.version - 1`, otherwise `Conflict`.
    async fn update_run(&self, run: &WorkflowRun) -> StorageResult<()>;

    /// Get one run by id, regardless of tenant.
    async fn get_run(&self, run_id: &WorkflowRunId) -> StorageResult<Option<WorkflowRun>>;

    /// Tenant-scoped listing, newest-first by creation time.
    async fn query_runs(&self, query: &RunQuery) -> StorageResult<Vec<WorkflowRun>>;

    /// Runs of a tenant in a non-terminal status.
    async fn count_active_runs(&self, tenant_id: &TenantId) -> StorageResult<u64>;
}

/// Lease-based mutual exclusion per run, shared by every orchestrator instance.
///
/// Implementations must make acquisition atomic: a lease is granted only if
/// no other unexpired lease exists for the run. An expired lease may be taken
/// over by anyone.
#[async_trait]
pub trait RunLockStore: Send + Sync {
    /// Single acquisition attempt. `None` means somebody else holds a live lease.
    async fn try_acquire(
        &self,
        run_id: &WorkflowRunId,
        owner: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StorageResult<Option<RunLease>>;

    /// Release a lease if it is still the current one. Returns `false` when
    /// the lease had already expired and been taken over.
    async fn release(&self, lease: &RunLease) -> StorageResult<bool>;
}

/// Storage interface for the append-only execution history and the node
/// result idempotency ledger.
#[async_trait]
pub trait ExecutionHistoryStore: Send + Sync {
    /// Append an event; storage assigns the per-run sequence number.
    async fn append_event(&self, event: EventAppend) -> StorageResult<ExecutionEvent>;

    /// All events of a run, ordered by sequence.
    async fn load_events(&self, run_id: &WorkflowRunId) -> StorageResult<Vec<ExecutionEvent>>;

    /// Atomic check-and-mark of `(run, node, attempt)`.
    ///
    /// Returns `true` if the key was already marked, otherwise marks it and
    /// returns `false`. Must be a single atomic primitive (unique insert),
    /// never a read followed by a write.
    async fn check_and_mark_node_result(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Remove a ledger mark so the attempt can be delivered again. Used when a
    /// marked result could not be applied for a transient reason.
    async fn clear_node_result(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> StorageResult<()>;
}

/// Shared store of issued execution tokens.
#[async_trait]
pub trait ExecutionTokenStore: Send + Sync {
    async fn save_execution_token(&self, token: &ExecutionToken) -> StorageResult<()>;

    /// Every token issued for one node attempt, expired or not.
    async fn find_execution_tokens(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> StorageResult<Vec<ExecutionToken>>;

    /// Drop all tokens of a run. Returns how many were removed.
    async fn revoke_execution_tokens(&self, run_id: &WorkflowRunId) -> StorageResult<u64>;

    /// Drop tokens that expired before `now`.
    async fn purge_expired_execution_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64>;
}

/// Shared store of callback registrations.
#[async_trait]
pub trait CallbackStore: Send + Sync {
    async fn save_callback(&self, registration: &CallbackRegistration) -> StorageResult<()>;

    /// A registration that has not been invalidated. Expiry is checked by the caller.
    async fn find_callback(&self, token: &str) -> StorageResult<Option<CallbackRegistration>>;

    /// Invalidate a registration as of `now`. Returns `false` if it was unknown or already invalid.
    async fn invalidate_callback(&self, token: &str, now: DateTime<Utc>) -> StorageResult<bool>;
}

/// Unified storage bundle used by the orchestrator.
pub trait OrchestratorStorage:
    WorkflowRunStore
    + RunLockStore
    + ExecutionHistoryStore
    + ExecutionTokenStore
    + CallbackStore
    + Send
    + Sync
{
}

impl<T> OrchestratorStorage for T where
    T: WorkflowRunStore
        + RunLockStore
        + ExecutionHistoryStore
        + ExecutionTokenStore
        + CallbackStore
        + Send
        + Sync
{
}
