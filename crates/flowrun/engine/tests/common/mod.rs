//! Shared harness for orchestrator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowrun_engine::*;
use flowrun_storage::{
    CallbackStore, ExecutionHistoryStore, ExecutionTokenStore, InMemoryRunStorage, RunLease,
    RunLockStore, StorageError, StorageResult, WorkflowRunStore,
};
use flowrun_types::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Counts compensation calls and records the run status that was durably
/// stored at the moment compensation ran.
pub struct RecordingCompensation {
    storage: Arc<InMemoryRunStorage>,
    pub calls: AtomicUsize,
    pub stored_status_at_call: Mutex<Vec<RunStatus>>,
    fail_with: Option<CompensationError>,
}

impl RecordingCompensation {
    pub fn new(storage: Arc<InMemoryRunStorage>) -> Self {
        Self {
            storage,
            calls: AtomicUsize::new(0),
            stored_status_at_call: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    pub fn failing(storage: Arc<InMemoryRunStorage>, error: CompensationError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::new(storage)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompensationCoordinator for RecordingCompensation {
    async fn compensate(&self, run: &WorkflowRun) -> Result<(), CompensationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stored = self
            .storage
            .get_run(&run.id)
            .await
            .ok()
            .flatten()
            .map(|r| r.status)
            .unwrap_or(RunStatus::Created);
        self.stored_status_at_call.lock().unwrap().push(stored);
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Remembers every routed signal
#[derive(Default)]
pub struct RecordingRouter {
    pub routed: Mutex<Vec<(WorkflowRunId, Signal)>>,
}

#[async_trait]
impl SignalRouter for RecordingRouter {
    async fn route(&self, run: &WorkflowRun, signal: &Signal) -> WorkflowResult<()> {
        self.routed
            .lock()
            .unwrap()
            .push((run.id.clone(), signal.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Failing storage
// ---------------------------------------------------------------------------

/// In-memory storage that can be told to fail its next run update or its
/// next history append, to simulate a backend dropping out mid-operation.
#[derive(Default)]
pub struct FlakyStorage {
    pub inner: InMemoryRunStorage,
    fail_next_update: Mutex<Option<StorageError>>,
    fail_next_append: Mutex<Option<StorageError>>,
}

impl FlakyStorage {
    pub fn fail_next_update(&self, error: StorageError) {
        *self.fail_next_update.lock().unwrap() = Some(error);
    }

    pub fn fail_next_append(&self, error: StorageError) {
        *self.fail_next_append.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl WorkflowRunStore for FlakyStorage {
    async fn insert_run(&self, run: &WorkflowRun) -> StorageResult<()> {
        self.inner.insert_run(run).await
    }

    async fn update_run(&self, run: &WorkflowRun) -> StorageResult<()> {
        let injected = self.fail_next_update.lock().unwrap().take();
        match injected {
            Some(err) => Err(err),
            None => self.inner.update_run(run).await,
        }
    }

    async fn get_run(&self, run_id: &WorkflowRunId) -> StorageResult<Option<WorkflowRun>> {
        self.inner.get_run(run_id).await
    }

    async fn query_runs(&self, query: &RunQuery) -> StorageResult<Vec<WorkflowRun>> {
        self.inner.query_runs(query).await
    }

    async fn count_active_runs(&self, tenant_id: &TenantId) -> StorageResult<u64> {
        self.inner.count_active_runs(tenant_id).await
    }
}

#[async_trait]
impl RunLockStore for FlakyStorage {
    async fn try_acquire(
        &self,
        run_id: &WorkflowRunId,
        owner: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StorageResult<Option<RunLease>> {
        self.inner.try_acquire(run_id, owner, now, ttl).await
    }

    async fn release(&self, lease: &RunLease) -> StorageResult<bool> {
        self.inner.release(lease).await
    }
}

#[async_trait]
impl ExecutionHistoryStore for FlakyStorage {
    async fn append_event(&self, event: EventAppend) -> StorageResult<ExecutionEvent> {
        let injected = self.fail_next_append.lock().unwrap().take();
        match injected {
            Some(err) => Err(err),
            None => self.inner.append_event(event).await,
        }
    }

    async fn load_events(&self, run_id: &WorkflowRunId) -> StorageResult<Vec<ExecutionEvent>> {
        self.inner.load_events(run_id).await
    }

    async fn check_and_mark_node_result(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.inner
            .check_and_mark_node_result(run_id, node_id, attempt, now)
            .await
    }

    async fn clear_node_result(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> StorageResult<()> {
        self.inner.clear_node_result(run_id, node_id, attempt).await
    }
}

#[async_trait]
impl ExecutionTokenStore for FlakyStorage {
    async fn save_execution_token(&self, token: &ExecutionToken) -> StorageResult<()> {
        self.inner.save_execution_token(token).await
    }

    async fn find_execution_tokens(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> StorageResult<Vec<ExecutionToken>> {
        self.inner.find_execution_tokens(run_id, node_id, attempt).await
    }

    async fn revoke_execution_tokens(&self, run_id: &WorkflowRunId) -> StorageResult<u64> {
        self.inner.revoke_execution_tokens(run_id).await
    }

    async fn purge_expired_execution_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        self.inner.purge_expired_execution_tokens(now).await
    }
}

#[async_trait]
impl CallbackStore for FlakyStorage {
    async fn save_callback(&self, registration: &CallbackRegistration) -> StorageResult<()> {
        self.inner.save_callback(registration).await
    }

    async fn find_callback(&self, token: &str) -> StorageResult<Option<CallbackRegistration>> {
        self.inner.find_callback(token).await
    }

    async fn invalidate_callback(&self, token: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        self.inner.invalidate_callback(token, now).await
    }
}

/// A manager over [`FlakyStorage`] with one running run
pub struct FlakyHarness {
    pub manager: WorkflowRunManager,
    pub storage: Arc<FlakyStorage>,
    pub tenant: TenantId,
    pub run: WorkflowRun,
}

impl FlakyHarness {
    pub async fn new() -> Self {
        let storage = Arc::new(FlakyStorage::default());
        let tenant = TenantId::new("acme");
        let (registry, definition_id) = registry(&tenant);
        let manager = WorkflowRunManager::builder(storage.clone(), registry)
            .config(fast_locks())
            .build();

        let run = manager
            .create_run(&definition_id, &tenant, BTreeMap::new())
            .await
            .unwrap();
        let run = manager.start_run(&run.id, &tenant).await.unwrap();

        Self {
            manager,
            storage,
            tenant,
            run,
        }
    }

    pub async fn stored_run(&self) -> WorkflowRun {
        self.manager.get_run(&self.run.id, &self.tenant).await.unwrap()
    }

    pub async fn node_completed_count(&self) -> usize {
        self.manager
            .get_execution_history(&self.run.id, &self.tenant)
            .await
            .unwrap()
            .count_of(ExecutionEventType::NodeCompleted)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub manager: WorkflowRunManager,
    pub storage: Arc<InMemoryRunStorage>,
    pub clock: Arc<ManualClock>,
    pub compensation: Arc<RecordingCompensation>,
    pub router: Arc<RecordingRouter>,
    pub tenant: TenantId,
    pub definition_id: WorkflowDefinitionId,
}

pub fn fast_locks() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_instance_id("test-instance")
        .with_lock(LockConfig {
            lease_ttl_ms: 2_000,
            wait_timeout_ms: 2_000,
            retry_interval_ms: 2,
        })
}

impl Harness {
    pub fn new() -> Self {
        let storage = Arc::new(InMemoryRunStorage::new());
        let compensation = Arc::new(RecordingCompensation::new(storage.clone()));
        Self::with_compensation(storage, compensation)
    }

    pub fn with_compensation(
        storage: Arc<InMemoryRunStorage>,
        compensation: Arc<RecordingCompensation>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let router = Arc::new(RecordingRouter::default());
        let tenant = TenantId::new("acme");

        let (registry, definition_id) = registry(&tenant);

        let manager = WorkflowRunManager::builder(storage.clone(), registry)
            .config(fast_locks())
            .clock(clock.clone())
            .compensation(compensation.clone())
            .signal_router(router.clone())
            .build();

        Self {
            manager,
            storage,
            clock,
            compensation,
            router,
            tenant,
            definition_id,
        }
    }

    pub async fn created_run(&self) -> WorkflowRun {
        self.manager
            .create_run(&self.definition_id, &self.tenant, BTreeMap::new())
            .await
            .unwrap()
    }

    pub async fn running_run(&self) -> WorkflowRun {
        let run = self.created_run().await;
        self.manager.start_run(&run.id, &self.tenant).await.unwrap()
    }

    pub async fn history(&self, run_id: &WorkflowRunId) -> ExecutionHistory {
        self.manager
            .get_execution_history(run_id, &self.tenant)
            .await
            .unwrap()
    }
}

pub fn outputs(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn registry(tenant: &TenantId) -> (Arc<InMemoryDefinitionRegistry>, WorkflowDefinitionId) {
    let registry = Arc::new(InMemoryDefinitionRegistry::new());
    let definition_id = registry
        .register(
            WorkflowDefinition::new("invoice-approval", tenant.clone())
                .with_node("n1")
                .with_node("n2")
                .with_node("node-7"),
        )
        .unwrap();
    (registry, definition_id)
}
