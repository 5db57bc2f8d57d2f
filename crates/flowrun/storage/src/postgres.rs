//! PostgreSQL adapter for Flowrun storage.
//!
//! This is the backend shared by a fleet of orchestrator instances. Run
//! aggregates are stored as JSONB with the columns needed for filtering and
//! the optimistic version check pulled out alongside.
//!
//! Lease timestamps come from the caller, so instances are expected to run
//! with reasonably synchronized clocks.

use crate::model::RunLease;
use crate::traits::{
    CallbackStore, ExecutionHistoryStore, ExecutionTokenStore, RunLockStore, WorkflowRunStore,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowrun_types::{
    CallbackRegistration, EventAppend, ExecutionEvent, ExecutionEventType, ExecutionToken, NodeId,
    RunQuery, RunStatus, TenantId, WorkflowRun, WorkflowRunId,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use uuid::Uuid;

/// PostgreSQL-backed storage adapter.
#[derive(Clone)]
pub struct PostgresRunStorage {
    pool: PgPool,
}

impl PostgresRunStorage {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS flowrun_runs (
                run_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                definition_id TEXT NOT NULL,
                status TEXT NOT NULL,
                body JSONB NOT NULL,
                version BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS flowrun_runs_tenant_status_idx
                ON flowrun_runs (tenant_id, status, created_at DESC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS flowrun_run_locks (
                run_id TEXT PRIMARY KEY,
                lease_id TEXT NOT NULL,
                owner TEXT NOT NULL,
                acquired_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS flowrun_execution_events (
                run_id TEXT NOT NULL,
                sequence BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata JSONB NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (run_id, sequence)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS flowrun_node_results (
                run_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                attempt BIGINT NOT NULL,
                processed_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (run_id, node_id, attempt)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS flowrun_execution_tokens (
                token TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                attempt BIGINT NOT NULL,
                issued_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS flowrun_execution_tokens_attempt_idx
                ON flowrun_execution_tokens (run_id, node_id, attempt)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS flowrun_callbacks (
                token TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                callback_url TEXT NOT NULL,
                registered_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ,
                invalidated_at TIMESTAMPTZ
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowRunStore for PostgresRunStorage {
    async fn insert_run(&self, run: &WorkflowRun) -> StorageResult<()> {
        let body = serde_json::to_value(run).map_err(|e| StorageError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO flowrun_runs
                (run_id, tenant_id, definition_id, status, body, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(run.id.as_str())
        .bind(run.tenant_id.as_str())
        .bind(run.definition_id.as_str())
        .bind(run.status.as_str())
        .bind(body)
        .bind(version_to_i64(run.version)?)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(())
    }

    async fn update_run(&self, run: &WorkflowRun) -> StorageResult<()> {
        let body = serde_json::to_value(run).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let expected = run.version.checked_sub(1).ok_or_else(|| {
            StorageError::InvalidInput(format!("run {} update without version bump", run.id))
        })?;

        let result = sqlx::query(
            r#"
            UPDATE flowrun_runs
               SET status = $1,
                   body = $2,
                   version = $3,
                   updated_at = $4
             WHERE run_id = $5
               AND version = $6
            "#,
        )
        .bind(run.status.as_str())
        .bind(body)
        .bind(version_to_i64(run.version)?)
        .bind(run.updated_at)
        .bind(run.id.as_str())
        .bind(version_to_i64(expected)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            let exists = self.get_run(&run.id).await?.is_some();
            if exists {
                return Err(StorageError::Conflict(format!(
                    "run {} version mismatch: update {}",
                    run.id, run.version
                )));
            }
            return Err(StorageError::NotFound(format!("run {} not found", run.id)));
        }

        Ok(())
    }

    async fn get_run(&self, run_id: &WorkflowRunId) -> StorageResult<Option<WorkflowRun>> {
        let row = sqlx::query("SELECT body FROM flowrun_runs WHERE run_id = $1")
            .bind(run_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(run_row_to_record).transpose()
    }

    async fn query_runs(&self, query: &RunQuery) -> StorageResult<Vec<WorkflowRun>> {
        let statuses = if query.statuses.is_empty() {
            None
        } else {
            Some(
                query
                    .statuses
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect::<Vec<_>>(),
            )
        };
        // LIMIT NULL is LIMIT ALL
        let limit = if query.limit == 0 {
            None
        } else {
            Some(to_i64(query.limit)?)
        };

        let rows = sqlx::query(
            r#"
            SELECT body
              FROM flowrun_runs
             WHERE tenant_id = $1
               AND ($2::TEXT[] IS NULL OR status = ANY($2))
               AND ($3::TEXT IS NULL OR definition_id = $3)
             ORDER BY created_at DESC, run_id ASC
             LIMIT $4 OFFSET $5
            "#,
        )
        .bind(query.tenant_id.as_str())
        .bind(statuses)
        .bind(query.definition_id.as_ref().map(|d| d.as_str().to_string()))
        .bind(limit)
        .bind(to_i64(query.offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(run_row_to_record).collect()
    }

    async fn count_active_runs(&self, tenant_id: &TenantId) -> StorageResult<u64> {
        let active = RunStatus::NON_TERMINAL
            .iter()
            .map(|s| s.as_str().to_string())
            .collect::<Vec<_>>();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM flowrun_runs WHERE tenant_id = $1 AND status = ANY($2)",
        )
        .bind(tenant_id.as_str())
        .bind(active)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl RunLockStore for PostgresRunStorage {
    async fn try_acquire(
        &self,
        run_id: &WorkflowRunId,
        owner: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StorageResult<Option<RunLease>> {
        let lease = RunLease {
            run_id: run_id.clone(),
            lease_id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };

        // The conditional upsert only takes over a row whose lease has expired.
        let granted = sqlx::query(
            r#"
            INSERT INTO flowrun_run_locks (run_id, lease_id, owner, acquired_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id) DO UPDATE
               SET lease_id = EXCLUDED.lease_id,
                   owner = EXCLUDED.owner,
                   acquired_at = EXCLUDED.acquired_at,
                   expires_at = EXCLUDED.expires_at
             WHERE flowrun_run_locks.expires_at <= EXCLUDED.acquired_at
            RETURNING lease_id
            "#,
        )
        .bind(run_id.as_str())
        .bind(&lease.lease_id)
        .bind(&lease.owner)
        .bind(lease.acquired_at)
        .bind(lease.expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(granted.map(|_| lease))
    }

    async fn release(&self, lease: &RunLease) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM flowrun_run_locks WHERE run_id = $1 AND lease_id = $2")
            .bind(lease.run_id.as_str())
            .bind(&lease.lease_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ExecutionHistoryStore for PostgresRunStorage {
    async fn append_event(&self, event: EventAppend) -> StorageResult<ExecutionEvent> {
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO flowrun_execution_events
                (run_id, sequence, event_type, message, metadata, timestamp)
            SELECT $1, COALESCE(MAX(sequence), 0) + 1, $2, $3, $4, $5
              FROM flowrun_execution_events
             WHERE run_id = $1
            RETURNING sequence
            "#,
        )
        .bind(event.run_id.as_str())
        .bind(event.event_type.as_str())
        .bind(&event.message)
        .bind(&event.metadata)
        .bind(event.timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(ExecutionEvent {
            sequence: sequence.max(0) as u64,
            run_id: event.run_id,
            event_type: event.event_type,
            message: event.message,
            metadata: event.metadata,
            timestamp: event.timestamp,
        })
    }

    async fn load_events(&self, run_id: &WorkflowRunId) -> StorageResult<Vec<ExecutionEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, sequence, event_type, message, metadata, timestamp
              FROM flowrun_execution_events
             WHERE run_id = $1
             ORDER BY sequence ASC
            "#,
        )
        .bind(run_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(event_row_to_record).collect()
    }

    async fn check_and_mark_node_result(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO flowrun_node_results (run_id, node_id, attempt, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (run_id, node_id, attempt) DO NOTHING
            "#,
        )
        .bind(run_id.as_str())
        .bind(node_id.as_str())
        .bind(i64::from(attempt))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() == 0)
    }

    async fn clear_node_result(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> StorageResult<()> {
        sqlx::query(
            "DELETE FROM flowrun_node_results WHERE run_id = $1 AND node_id = $2 AND attempt = $3",
        )
        .bind(run_id.as_str())
        .bind(node_id.as_str())
        .bind(i64::from(attempt))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionTokenStore for PostgresRunStorage {
    async fn save_execution_token(&self, token: &ExecutionToken) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO flowrun_execution_tokens
                (token, run_id, node_id, attempt, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&token.token)
        .bind(token.run_id.as_str())
        .bind(token.node_id.as_str())
        .bind(i64::from(token.attempt))
        .bind(token.issued_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(())
    }

    async fn find_execution_tokens(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> StorageResult<Vec<ExecutionToken>> {
        let rows = sqlx::query(
            r#"
            SELECT token, run_id, node_id, attempt, issued_at, expires_at
              FROM flowrun_execution_tokens
             WHERE run_id = $1 AND node_id = $2 AND attempt = $3
             ORDER BY issued_at ASC
            "#,
        )
        .bind(run_id.as_str())
        .bind(node_id.as_str())
        .bind(i64::from(attempt))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(token_row_to_record).collect()
    }

    async fn revoke_execution_tokens(&self, run_id: &WorkflowRunId) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM flowrun_execution_tokens WHERE run_id = $1")
            .bind(run_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn purge_expired_execution_tokens(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM flowrun_execution_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CallbackStore for PostgresRunStorage {
    async fn save_callback(&self, registration: &CallbackRegistration) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO flowrun_callbacks
                (token, run_id, node_id, callback_url, registered_at, expires_at, invalidated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NULL)
            "#,
        )
        .bind(&registration.token)
        .bind(registration.run_id.as_str())
        .bind(registration.node_id.as_str())
        .bind(&registration.callback_url)
        .bind(registration.registered_at)
        .bind(registration.expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        Ok(())
    }

    async fn find_callback(&self, token: &str) -> StorageResult<Option<CallbackRegistration>> {
        let row = sqlx::query(
            r#"
            SELECT token, run_id, node_id, callback_url, registered_at, expires_at
              FROM flowrun_callbacks
             WHERE token = $1 AND invalidated_at IS NULL
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(callback_row_to_record).transpose()
    }

    async fn invalidate_callback(&self, token: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE flowrun_callbacks
               SET invalidated_at = $1
             WHERE token = $2 AND invalidated_at IS NULL
            "#,
        )
        .bind(now)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }
}

fn run_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<WorkflowRun> {
    let body: serde_json::Value = row.try_get("body").map_err(backend)?;
    serde_json::from_value(body).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn event_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<ExecutionEvent> {
    let event_type: String = row.try_get("event_type").map_err(backend)?;
    let sequence: i64 = row.try_get("sequence").map_err(backend)?;
    Ok(ExecutionEvent {
        sequence: sequence.max(0) as u64,
        run_id: WorkflowRunId::new(row.try_get::<String, _>("run_id").map_err(backend)?),
        event_type: event_type
            .parse::<ExecutionEventType>()
            .map_err(|e| StorageError::Serialization(e.to_string()))?,
        message: row.try_get("message").map_err(backend)?,
        metadata: row.try_get("metadata").map_err(backend)?,
        timestamp: row.try_get("timestamp").map_err(backend)?,
    })
}

fn token_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<ExecutionToken> {
    let attempt: i64 = row.try_get("attempt").map_err(backend)?;
    Ok(ExecutionToken {
        token: row.try_get("token").map_err(backend)?,
        run_id: WorkflowRunId::new(row.try_get::<String, _>("run_id").map_err(backend)?),
        node_id: NodeId::new(row.try_get::<String, _>("node_id").map_err(backend)?),
        attempt: u32::try_from(attempt)
            .map_err(|_| StorageError::Serialization(format!("attempt {attempt} out of range")))?,
        issued_at: row.try_get("issued_at").map_err(backend)?,
        expires_at: row.try_get("expires_at").map_err(backend)?,
    })
}

fn callback_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<CallbackRegistration> {
    Ok(CallbackRegistration {
        token: row.try_get("token").map_err(backend)?,
        run_id: WorkflowRunId::new(row.try_get::<String, _>("run_id").map_err(backend)?),
        node_id: NodeId::new(row.try_get::<String, _>("node_id").map_err(backend)?),
        callback_url: row.try_get("callback_url").map_err(backend)?,
        registered_at: row.try_get("registered_at").map_err(backend)?,
        expires_at: row.try_get("expires_at").map_err(backend)?,
    })
}

fn backend(err: sqlx::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput("window value too large".to_string()))
}

fn version_to_i64(version: u64) -> StorageResult<i64> {
    i64::try_from(version)
        .map_err(|_| StorageError::InvalidInput(format!("run version {version} too large")))
}
