//! Run persistence and the per-run distributed lock
//!
//! [`WorkflowRunRepository::with_lock`] is the only way lifecycle and feedback
//! paths touch a run: it takes a lease on the run in shared storage, loads the
//! run, hands it to the operation, and releases the lease on every exit path,
//! including a panic inside the operation.

use crate::config::LockConfig;
use flowrun_storage::{OrchestratorStorage, RunLease};
use flowrun_types::{
    Clock, RunQuery, RunSnapshot, TenantId, WorkflowError, WorkflowResult, WorkflowRun,
    WorkflowRunId,
};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;

/// Persistence for run aggregates plus per-run mutual exclusion
#[derive(Clone)]
pub struct WorkflowRunRepository {
    storage: Arc<dyn OrchestratorStorage>,
    clock: Arc<dyn Clock>,
    owner: String,
    lock: LockConfig,
}

impl WorkflowRunRepository {
    pub fn new(
        storage: Arc<dyn OrchestratorStorage>,
        clock: Arc<dyn Clock>,
        owner: impl Into<String>,
        lock: LockConfig,
    ) -> Self {
        Self {
            storage,
            clock,
            owner: owner.into(),
            lock,
        }
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Store a new run
    pub async fn persist(&self, run: &WorkflowRun) -> WorkflowResult<()> {
        self.storage.insert_run(run).await?;
        Ok(())
    }

    /// Bump the version and write the run back. Fails with `Conflict` if the
    /// stored copy moved underneath us.
    pub async fn update(&self, run: &mut WorkflowRun) -> WorkflowResult<()> {
        run.version += 1;
        if let Err(err) = self.storage.update_run(run).await {
            run.version -= 1;
            return Err(err.into());
        }
        Ok(())
    }

    pub async fn find_by_id(&self, run_id: &WorkflowRunId) -> WorkflowResult<Option<WorkflowRun>> {
        Ok(self.storage.get_run(run_id).await?)
    }

    /// Tenant-scoped lookup. Runs of other tenants are reported as missing.
    pub async fn find_for_tenant(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
    ) -> WorkflowResult<WorkflowRun> {
        self.find_by_id(run_id)
            .await?
            .filter(|run| run.belongs_to(tenant_id))
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.clone()))
    }

    pub async fn snapshot(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
    ) -> WorkflowResult<RunSnapshot> {
        Ok(self.find_for_tenant(run_id, tenant_id).await?.snapshot())
    }

    pub async fn query(&self, query: &RunQuery) -> WorkflowResult<Vec<RunSnapshot>> {
        let runs = self.storage.query_runs(query).await?;
        Ok(runs.iter().map(WorkflowRun::snapshot).collect())
    }

    pub async fn count_active(&self, tenant_id: &TenantId) -> WorkflowResult<u64> {
        Ok(self.storage.count_active_runs(tenant_id).await?)
    }

    // ── Locking ──────────────────────────────────────────────────────

    /// Run `op` on the current state of `run_id` while holding its lease.
    ///
    /// The operation receives the loaded run and is responsible for calling
    /// [`update`](Self::update) if it mutated it. Fails with `LockTimeout` if
    /// the lease could not be taken within the configured wait bound, and with
    /// `RunNotFound` if the run does not exist.
    pub async fn with_lock<T, F, Fut>(&self, run_id: &WorkflowRunId, op: F) -> WorkflowResult<T>
    where
        F: FnOnce(WorkflowRun) -> Fut + Send,
        Fut: Future<Output = WorkflowResult<T>> + Send,
        T: Send,
    {
        let lease = self.acquire(run_id).await?;

        let outcome = match self.storage.get_run(run_id).await {
            Ok(Some(run)) => AssertUnwindSafe(op(run)).catch_unwind().await,
            Ok(None) => Ok(Err(WorkflowError::RunNotFound(run_id.clone()))),
            Err(err) => Ok(Err(err.into())),
        };

        self.release(&lease).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!(run_id = %run_id, "Operation panicked while holding run lease");
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn acquire(&self, run_id: &WorkflowRunId) -> WorkflowResult<RunLease> {
        let started = Instant::now();
        let deadline = started + self.lock.wait_timeout();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let now = self.clock.now();
            if let Some(lease) = self
                .storage
                .try_acquire(run_id, &self.owner, now, self.lock.lease_ttl())
                .await?
            {
                if attempts > 1 {
                    tracing::debug!(run_id = %run_id, attempts, "Run lease acquired after contention");
                }
                return Ok(lease);
            }

            if Instant::now() + self.lock.retry_interval() > deadline {
                let waited_ms = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;
                tracing::warn!(run_id = %run_id, waited_ms, attempts, "Timed out waiting for run lease");
                return Err(WorkflowError::LockTimeout {
                    run_id: run_id.clone(),
                    waited_ms,
                });
            }

            tracing::debug!(run_id = %run_id, attempt = attempts, "Run lease busy, retrying");
            tokio::time::sleep(self.lock.retry_interval()).await;
        }
    }

    async fn release(&self, lease: &RunLease) {
        if lease.is_expired(self.clock.now()) {
            tracing::warn!(
                run_id = %lease.run_id,
                lease_id = %lease.lease_id,
                "Run lease expired before the operation finished"
            );
        }
        match self.storage.release(lease).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                run_id = %lease.run_id,
                lease_id = %lease.lease_id,
                "Run lease was taken over by another holder"
            ),
            Err(err) => tracing::warn!(
                run_id = %lease.run_id,
                error = %err,
                "Failed to release run lease; it will lapse at expiry"
            ),
        }
    }
}
