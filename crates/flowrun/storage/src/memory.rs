//! In-memory reference implementation of the Flowrun storage traits.
//!
//! Shared by every orchestrator handle in one process. Each store sits behind
//! its own `RwLock` and every trait method takes that lock exactly once, so
//! lease acquisition and ledger marking are atomic.

use crate::model::RunLease;
use crate::traits::{
    CallbackStore, ExecutionHistoryStore, ExecutionTokenStore, RunLockStore, WorkflowRunStore,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowrun_types::{
    CallbackRegistration, EventAppend, ExecutionEvent, ExecutionToken, NodeId, RunQuery,
    TenantId, WorkflowRun, WorkflowRunId,
};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory Flowrun storage backend.
#[derive(Default)]
pub struct InMemoryRunStorage {
    runs: RwLock<HashMap<WorkflowRunId, WorkflowRun>>,
    leases: RwLock<HashMap<WorkflowRunId, RunLease>>,
    events: RwLock<HashMap<WorkflowRunId, Vec<ExecutionEvent>>>,
    processed: RwLock<HashSet<(WorkflowRunId, NodeId, u32)>>,
    tokens: RwLock<HashMap<String, ExecutionToken>>,
    callbacks: RwLock<HashMap<String, CallbackRegistration>>,
}

impl InMemoryRunStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(name: &str) -> StorageError {
    StorageError::Backend(format!("{name} lock poisoned"))
}

#[async_trait]
impl WorkflowRunStore for InMemoryRunStorage {
    async fn insert_run(&self, run: &WorkflowRun) -> StorageResult<()> {
        let mut guard = self.runs.write().map_err(|_| poisoned("runs"))?;
        if guard.contains_key(&run.id) {
            return Err(StorageError::Conflict(format!("run {} already exists", run.id)));
        }
        guard.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &WorkflowRun) -> StorageResult<()> {
        let mut guard = self.runs.write().map_err(|_| poisoned("runs"))?;
        let stored = guard
            .get_mut(&run.id)
            .ok_or_else(|| StorageError::NotFound(format!("run {} not found", run.id)))?;

        if stored.version + 1 != run.version {
            return Err(StorageError::Conflict(format!(
                "run {} version mismatch: stored {}, update {}",
                run.id, stored.version, run.version
            )));
        }

        *stored = run.clone();
        Ok(())
    }

    async fn get_run(&self, run_id: &WorkflowRunId) -> StorageResult<Option<WorkflowRun>> {
        let guard = self.runs.read().map_err(|_| poisoned("runs"))?;
        Ok(guard.get(run_id).cloned())
    }

    async fn query_runs(&self, query: &RunQuery) -> StorageResult<Vec<WorkflowRun>> {
        let guard = self.runs.read().map_err(|_| poisoned("runs"))?;
        let mut values = guard
            .values()
            .filter(|run| query.matches(&run.tenant_id, run.status, &run.definition_id))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(apply_window(values, query.limit, query.offset))
    }

    async fn count_active_runs(&self, tenant_id: &TenantId) -> StorageResult<u64> {
        let guard = self.runs.read().map_err(|_| poisoned("runs"))?;
        Ok(guard
            .values()
            .filter(|run| &run.tenant_id == tenant_id && !run.is_terminal())
            .count() as u64)
    }
}

#[async_trait]
impl RunLockStore for InMemoryRunStorage {
    async fn try_acquire(
        &self,
        run_id: &WorkflowRunId,
        owner: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StorageResult<Option<RunLease>> {
        let mut guard = self.leases.write().map_err(|_| poisoned("leases"))?;
        if let Some(current) = guard.get(run_id) {
            if !current.is_expired(now) {
                return Ok(None);
            }
        }

        let lease = RunLease {
            run_id: run_id.clone(),
            lease_id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };
        guard.insert(run_id.clone(), lease.clone());
        Ok(Some(lease))
    }

    async fn release(&self, lease: &RunLease) -> StorageResult<bool> {
        let mut guard = self.leases.write().map_err(|_| poisoned("leases"))?;
        match guard.get(&lease.run_id) {
            Some(current) if current.lease_id == lease.lease_id => {
                guard.remove(&lease.run_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ExecutionHistoryStore for InMemoryRunStorage {
    async fn append_event(&self, event: EventAppend) -> StorageResult<ExecutionEvent> {
        let mut guard = self.events.write().map_err(|_| poisoned("events"))?;
        let history = guard.entry(event.run_id.clone()).or_default();
        let record = ExecutionEvent {
            sequence: history.len() as u64 + 1,
            run_id: event.run_id,
            event_type: event.event_type,
            message: event.message,
            metadata: event.metadata,
            timestamp: event.timestamp,
        };
        history.push(record.clone());
        Ok(record)
    }

    async fn load_events(&self, run_id: &WorkflowRunId) -> StorageResult<Vec<ExecutionEvent>> {
        let guard = self.events.read().map_err(|_| poisoned("events"))?;
        Ok(guard.get(run_id).cloned().unwrap_or_default())
    }

    async fn check_and_mark_node_result(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
        _now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut guard = self.processed.write().map_err(|_| poisoned("ledger"))?;
        // `insert` reports whether the key was new
        Ok(!guard.insert((run_id.clone(), node_id.clone(), attempt)))
    }

    async fn clear_node_result(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> StorageResult<()> {
        let mut guard = self.processed.write().map_err(|_| poisoned("ledger"))?;
        guard.remove(&(run_id.clone(), node_id.clone(), attempt));
        Ok(())
    }
}

#[async_trait]
impl ExecutionTokenStore for InMemoryRunStorage {
    async fn save_execution_token(&self, token: &ExecutionToken) -> StorageResult<()> {
        let mut guard = self.tokens.write().map_err(|_| poisoned("tokens"))?;
        if guard.contains_key(&token.token) {
            return Err(StorageError::Conflict("execution token already issued".to_string()));
        }
        guard.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn find_execution_tokens(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> StorageResult<Vec<ExecutionToken>> {
        let guard = self.tokens.read().map_err(|_| poisoned("tokens"))?;
        let mut found = guard
            .values()
            .filter(|t| t.covers(run_id, node_id, attempt))
            .cloned()
            .collect::<Vec<_>>();
        found.sort_by(|a, b| a.issued_at.cmp(&b.issued_at));
        Ok(found)
    }

    async fn revoke_execution_tokens(&self, run_id: &WorkflowRunId) -> StorageResult<u64> {
        let mut guard = self.tokens.write().map_err(|_| poisoned("tokens"))?;
        let before = guard.len();
        guard.retain(|_, t| &t.run_id != run_id);
        Ok((before - guard.len()) as u64)
    }

    async fn purge_expired_execution_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let mut guard = self.tokens.write().map_err(|_| poisoned("tokens"))?;
        let before = guard.len();
        guard.retain(|_, t| !t.is_expired(now));
        Ok((before - guard.len()) as u64)
    }
}

#[async_trait]
impl CallbackStore for InMemoryRunStorage {
    async fn save_callback(&self, registration: &CallbackRegistration) -> StorageResult<()> {
        let mut guard = self.callbacks.write().map_err(|_| poisoned("callbacks"))?;
        if guard.contains_key(&registration.token) {
            return Err(StorageError::Conflict("callback token already registered".to_string()));
        }
        guard.insert(registration.token.clone(), registration.clone());
        Ok(())
    }

    async fn find_callback(&self, token: &str) -> StorageResult<Option<CallbackRegistration>> {
        let guard = self.callbacks.read().map_err(|_| poisoned("callbacks"))?;
        Ok(guard.get(token).cloned())
    }

    async fn invalidate_callback(&self, token: &str, _now: DateTime<Utc>) -> StorageResult<bool> {
        let mut guard = self.callbacks.write().map_err(|_| poisoned("callbacks"))?;
        Ok(guard.remove(token).is_some())
    }
}

fn apply_window<T>(items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    let iter = items.into_iter().skip(offset);
    if limit == 0 {
        iter.collect()
    } else {
        iter.take(limit).collect()
    }
}
