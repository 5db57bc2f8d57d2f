//! Workflow run manager: the orchestrator façade
//!
//! Every lifecycle and feedback operation follows the same discipline:
//! 1. Take the run's lease through [`WorkflowRunRepository::with_lock`]
//! 2. Mutate the loaded run in memory
//! 3. Append the audit event
//! 4. Persist with a version bump
//!
//! The lease is released on every exit path. The external entry points
//! ([`on_node_execution_completed`](WorkflowRunManager::on_node_execution_completed),
//! [`on_external_signal`](WorkflowRunManager::on_external_signal)) verify their
//! credentials before reaching the trusted internal path.

use crate::callback_service::CallbackService;
use crate::compensation::{CompensationCoordinator, NoopCompensationCoordinator};
use crate::config::OrchestratorConfig;
use crate::definition_registry::WorkflowDefinitionRegistry;
use crate::history::ExecutionHistoryRepository;
use crate::repository::WorkflowRunRepository;
use crate::signal_router::SignalRouter;
use crate::token_service::ExecutionTokenService;
use crate::transition_validator::StateTransitionValidator;
use flowrun_storage::OrchestratorStorage;
use flowrun_types::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const SECURITY_TARGET: &str = "flowrun::security";

/// The orchestrator façade
#[derive(Clone)]
pub struct WorkflowRunManager {
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
    runs: WorkflowRunRepository,
    history: ExecutionHistoryRepository,
    tokens: ExecutionTokenService,
    callbacks: CallbackService,
    validator: StateTransitionValidator,
    definitions: Arc<dyn WorkflowDefinitionRegistry>,
    compensation: Arc<dyn CompensationCoordinator>,
    signal_router: Option<Arc<dyn SignalRouter>>,
}

/// Assembles a [`WorkflowRunManager`] over one shared storage backend
pub struct WorkflowRunManagerBuilder {
    runs_store: Arc<dyn OrchestratorStorage>,
    history_store: Arc<dyn flowrun_storage::ExecutionHistoryStore>,
    token_store: Arc<dyn flowrun_storage::ExecutionTokenStore>,
    callback_store: Arc<dyn flowrun_storage::CallbackStore>,
    definitions: Arc<dyn WorkflowDefinitionRegistry>,
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
    compensation: Arc<dyn CompensationCoordinator>,
    signal_router: Option<Arc<dyn SignalRouter>>,
}

impl WorkflowRunManagerBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn compensation(mut self, compensation: Arc<dyn CompensationCoordinator>) -> Self {
        self.compensation = compensation;
        self
    }

    pub fn signal_router(mut self, router: Arc<dyn SignalRouter>) -> Self {
        self.signal_router = Some(router);
        self
    }

    pub fn build(self) -> WorkflowRunManager {
        let runs = WorkflowRunRepository::new(
            self.runs_store,
            self.clock.clone(),
            self.config.instance_id.clone(),
            self.config.lock.clone(),
        );
        let tokens = ExecutionTokenService::new(
            self.token_store,
            self.clock.clone(),
            self.config.token_lease(),
        );

        tracing::info!(
            instance_id = %self.config.instance_id,
            token_lease_secs = self.config.token_lease_secs,
            lease_ttl_ms = self.config.lock.lease_ttl_ms,
            "Workflow run manager ready"
        );

        WorkflowRunManager {
            runs,
            history: ExecutionHistoryRepository::new(self.history_store),
            tokens,
            callbacks: CallbackService::new(self.callback_store, self.clock.clone()),
            validator: StateTransitionValidator::new(),
            definitions: self.definitions,
            compensation: self.compensation,
            signal_router: self.signal_router,
            clock: self.clock,
            config: self.config,
        }
    }
}

impl WorkflowRunManager {
    /// Start assembling a manager. Defaults: system clock, default config,
    /// no compensation, no signal router.
    pub fn builder<S>(
        storage: Arc<S>,
        definitions: Arc<dyn WorkflowDefinitionRegistry>,
    ) -> WorkflowRunManagerBuilder
    where
        S: OrchestratorStorage + 'static,
    {
        WorkflowRunManagerBuilder {
            runs_store: storage.clone(),
            history_store: storage.clone(),
            token_store: storage.clone(),
            callback_store: storage,
            definitions,
            config: OrchestratorConfig::default(),
            clock: Arc::new(SystemClock),
            compensation: Arc::new(NoopCompensationCoordinator),
            signal_router: None,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn repository(&self) -> &WorkflowRunRepository {
        &self.runs
    }

    // ── Run Lifecycle ────────────────────────────────────────────────

    /// Materialise a new run of a tenant's definition in `CREATED`.
    pub async fn create_run(
        &self,
        definition_id: &WorkflowDefinitionId,
        tenant_id: &TenantId,
        inputs: BTreeMap<String, Value>,
    ) -> WorkflowResult<WorkflowRun> {
        let definition = self.definitions.lookup(definition_id, tenant_id).await?;
        let now = self.clock.now();
        let run = WorkflowRun::new(definition.id.clone(), tenant_id.clone(), now).with_inputs(inputs);

        self.runs.persist(&run).await?;
        self.history
            .record_run_created(&run.id, &definition.id, now)
            .await?;

        tracing::info!(
            run_id = %run.id,
            tenant_id = %tenant_id,
            definition_id = %definition.id,
            definition_version = definition.version,
            "Run created"
        );
        Ok(run)
    }

    /// CREATED → RUNNING
    pub async fn start_run(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
    ) -> WorkflowResult<WorkflowRun> {
        self.runs
            .with_lock(run_id, |mut run| async move {
                ensure_tenant(&run, tenant_id)?;
                let now = self.clock.now();
                let from = run.status;
                run.start(now)?;

                self.history
                    .record_status_changed(&run.id, from, run.status, Map::new(), now)
                    .await?;
                self.runs.update(&mut run).await?;

                tracing::info!(run_id = %run.id, tenant_id = %run.tenant_id, "Run started");
                Ok(run)
            })
            .await
    }

    /// RUNNING → SUSPENDED, recording why and which node the run waits on
    pub async fn suspend_run(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
        reason: &str,
        waiting_on_node_id: Option<NodeId>,
    ) -> WorkflowResult<WorkflowRun> {
        self.runs
            .with_lock(run_id, |mut run| async move {
                ensure_tenant(&run, tenant_id)?;
                let now = self.clock.now();
                let from = run.status;
                run.suspend(reason, waiting_on_node_id.clone(), now)?;

                let mut extra = Map::new();
                extra.insert("reason".into(), Value::String(reason.to_string()));
                extra.insert(
                    "waiting_on_node_id".into(),
                    waiting_on_node_id
                        .as_ref()
                        .map(|n| Value::String(n.as_str().to_string()))
                        .unwrap_or(Value::Null),
                );
                self.history
                    .record_status_changed(&run.id, from, run.status, extra, now)
                    .await?;
                self.runs.update(&mut run).await?;

                tracing::info!(
                    run_id = %run.id,
                    tenant_id = %run.tenant_id,
                    reason,
                    waiting_on = ?run.waiting_on_node_id,
                    "Run suspended"
                );
                Ok(run)
            })
            .await
    }

    /// SUSPENDED → RUNNING, merging `resume_data` into the run context
    pub async fn resume_run(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
        resume_data: BTreeMap<String, Value>,
    ) -> WorkflowResult<WorkflowRun> {
        self.runs
            .with_lock(run_id, |mut run| async move {
                ensure_tenant(&run, tenant_id)?;
                let now = self.clock.now();
                let from = run.status;
                let resumed_node = run.waiting_on_node_id.clone();
                run.resume(resume_data.clone(), now)?;

                let mut extra = Map::new();
                if let Some(node) = resumed_node {
                    extra.insert("resumed_node_id".into(), Value::String(node.as_str().to_string()));
                }
                extra.insert(
                    "resume_data".into(),
                    Value::Object(resume_data.into_iter().collect()),
                );
                self.history
                    .record_status_changed(&run.id, from, run.status, extra, now)
                    .await?;
                self.runs.update(&mut run).await?;

                tracing::info!(run_id = %run.id, tenant_id = %run.tenant_id, "Run resumed");
                Ok(run)
            })
            .await
    }

    /// Any non-terminal status → CANCELED
    pub async fn cancel_run(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
        reason: &str,
    ) -> WorkflowResult<WorkflowRun> {
        self.runs
            .with_lock(run_id, |mut run| async move {
                ensure_tenant(&run, tenant_id)?;
                let now = self.clock.now();
                let from = run.status;
                run.cancel(now)?;

                let mut extra = Map::new();
                extra.insert("reason".into(), Value::String(reason.to_string()));
                self.history
                    .record_status_changed(&run.id, from, run.status, extra, now)
                    .await?;
                self.runs.update(&mut run).await?;
                self.tokens.revoke_for_run(&run.id).await;

                tracing::info!(run_id = %run.id, tenant_id = %run.tenant_id, reason, "Run canceled");
                Ok(run)
            })
            .await
    }

    /// RUNNING → COMPLETED with the final outputs merged over accumulated ones
    pub async fn complete_run(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
        outputs: BTreeMap<String, Value>,
    ) -> WorkflowResult<WorkflowRun> {
        self.runs
            .with_lock(run_id, |mut run| async move {
                ensure_tenant(&run, tenant_id)?;
                let now = self.clock.now();
                run.complete(outputs.clone(), now)?;

                self.history
                    .record_run_completed(&run.id, &outputs, now)
                    .await?;
                self.runs.update(&mut run).await?;
                self.tokens.revoke_for_run(&run.id).await;

                tracing::info!(
                    run_id = %run.id,
                    tenant_id = %run.tenant_id,
                    outputs = run.outputs.len(),
                    "Run completed"
                );
                Ok(run)
            })
            .await
    }

    /// RUNNING → FAILED, then compensate, then persist.
    ///
    /// If compensation fails the run is still persisted as FAILED with
    /// `compensation_error` set, and `CompensationFailure` is returned.
    pub async fn fail_run(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
        error: ErrorInfo,
    ) -> WorkflowResult<WorkflowRun> {
        self.runs
            .with_lock(run_id, |mut run| async move {
                ensure_tenant(&run, tenant_id)?;
                self.validator
                    .validate(run.status, RunStatus::Failed)
                    .into_result()?;

                let now = self.clock.now();
                run.fail(error.clone(), now)?;
                self.history.record_run_failed(&run.id, &error, now).await?;

                let compensation = self.compensation.compensate(&run).await;
                if let Err(err) = &compensation {
                    let reason = err.to_string();
                    tracing::warn!(run_id = %run.id, error = %reason, "Compensation failed");
                    run.compensation_error = Some(reason.clone());
                    self.history
                        .record_compensation_failed(&run.id, &reason, now)
                        .await?;
                }

                self.runs.update(&mut run).await?;
                self.tokens.revoke_for_run(&run.id).await;

                tracing::info!(
                    run_id = %run.id,
                    tenant_id = %run.tenant_id,
                    error_code = %error.code,
                    "Run failed"
                );

                match compensation {
                    Ok(()) => Ok(run),
                    Err(err) => Err(WorkflowError::CompensationFailure {
                        run_id: run.id.clone(),
                        message: err.to_string(),
                    }),
                }
            })
            .await
    }

    // ── Feedback ─────────────────────────────────────────────────────

    /// Apply an executor's result for one node attempt, exactly once.
    ///
    /// The idempotency ledger is consulted before the lease is taken; a
    /// repeated `(run, node, attempt)` is a no-op reported as `Duplicate`.
    /// `NODE_COMPLETED` is appended only once the updated run is stored. If
    /// storing fails (lease timeout, backend error or a version conflict) the
    /// ledger mark is cleared again so the executor can redeliver.
    pub async fn handle_node_result(
        &self,
        run_id: &WorkflowRunId,
        result: NodeExecutionResult,
    ) -> WorkflowResult<NodeResultOutcome> {
        if &result.run_id != run_id {
            return Err(WorkflowError::Validation(format!(
                "node result for run {} delivered to run {}",
                result.run_id, run_id
            )));
        }

        let already_processed = self
            .history
            .is_node_result_processed(run_id, &result.node_id, result.attempt, self.clock.now())
            .await?;
        if already_processed {
            tracing::debug!(
                run_id = %run_id,
                node_id = %result.node_id,
                attempt = result.attempt,
                "Duplicate node result ignored"
            );
            return Ok(NodeResultOutcome::Duplicate);
        }

        let node_id = result.node_id.clone();
        let attempt = result.attempt;
        let applied = self
            .runs
            .with_lock(run_id, |mut run| async move {
                if !run.accepts_node_results() {
                    return Err(WorkflowError::RunNotActive {
                        run_id: run.id.clone(),
                        status: run.status,
                    });
                }

                let now = self.clock.now();
                if result.is_success() {
                    let outputs = result.outputs.clone();
                    run.complete_node(result.node_id.clone(), result.attempt, outputs, now)?;
                } else {
                    let error = result.error.clone();
                    run.fail_node(result.node_id.clone(), result.attempt, error, now)?;
                }
                self.runs.update(&mut run).await?;

                // The run holds the result from here on, so the ledger mark stays
                if let Err(err) = self.history.record_node_result(&result, now).await {
                    tracing::warn!(
                        run_id = %run.id,
                        node_id = %result.node_id,
                        attempt = result.attempt,
                        error = %err,
                        "Node result applied but its history event was not recorded"
                    );
                }
                Ok(run)
            })
            .await;

        match applied {
            Ok(run) => {
                tracing::info!(
                    run_id = %run.id,
                    node_id = %node_id,
                    attempt,
                    status = %run.status,
                    "Node result applied"
                );
                Ok(NodeResultOutcome::Applied)
            }
            Err(err) => {
                // Nothing was applied; a redelivery must not be taken for a duplicate
                if err.is_retryable()
                    || matches!(err, WorkflowError::Storage(_) | WorkflowError::Conflict(_))
                {
                    self.history
                        .release_node_result(run_id, &node_id, attempt)
                        .await?;
                }
                Err(err)
            }
        }
    }

    /// Record a trusted signal for a run and hand it to the signal router.
    pub async fn signal(&self, run_id: &WorkflowRunId, signal: Signal) -> WorkflowResult<()> {
        let recorded = &signal;
        let run = self
            .runs
            .with_lock(run_id, |run| async move {
                self.history
                    .record_signal(&run.id, recorded, self.clock.now())
                    .await?;
                Ok(run)
            })
            .await?;

        tracing::info!(
            run_id = %run_id,
            signal = %signal.name,
            target_node_id = %signal.target_node_id,
            "Signal recorded"
        );

        if let Some(router) = &self.signal_router {
            if let Err(err) = router.route(&run, &signal).await {
                tracing::warn!(run_id = %run_id, signal = %signal.name, error = %err, "Signal routing failed");
                return Err(err);
            }
        }
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn get_run(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
    ) -> WorkflowResult<WorkflowRun> {
        self.runs.find_for_tenant(run_id, tenant_id).await
    }

    pub async fn get_snapshot(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
    ) -> WorkflowResult<RunSnapshot> {
        self.runs.snapshot(run_id, tenant_id).await
    }

    pub async fn get_execution_history(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
    ) -> WorkflowResult<ExecutionHistory> {
        self.runs.find_for_tenant(run_id, tenant_id).await?;
        self.history.load(run_id).await
    }

    pub async fn query_runs(&self, query: &RunQuery) -> WorkflowResult<Vec<RunSnapshot>> {
        self.runs.query(query).await
    }

    /// Runs of a tenant that have not reached a terminal state
    pub async fn get_active_runs_count(&self, tenant_id: &TenantId) -> WorkflowResult<u64> {
        self.runs.count_active(tenant_id).await
    }

    /// Dry-run check of moving a run to `target`. Never mutates.
    pub async fn validate_transition(
        &self,
        run_id: &WorkflowRunId,
        tenant_id: &TenantId,
        target: RunStatus,
    ) -> WorkflowResult<ValidationResult> {
        let run = self.runs.find_for_tenant(run_id, tenant_id).await?;
        Ok(self.validator.validate(run.status, target))
    }

    // ── External Integration ─────────────────────────────────────────

    /// Issue the token an executor needs to report one node attempt
    pub async fn create_execution_token(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> WorkflowResult<ExecutionToken> {
        if attempt == 0 {
            return Err(WorkflowError::Validation("attempts start at 1".to_string()));
        }
        self.ensure_exists(run_id).await?;
        self.tokens.issue(run_id, node_id, attempt).await
    }

    /// Untrusted entry point for executor reports
    pub async fn on_node_execution_completed(
        &self,
        result: NodeExecutionResult,
        executor_signature: &str,
    ) -> WorkflowResult<NodeResultOutcome> {
        if !self
            .tokens
            .verify_signature(&result, executor_signature)
            .await?
        {
            tracing::warn!(
                target: SECURITY_TARGET,
                run_id = %result.run_id,
                node_id = %result.node_id,
                attempt = result.attempt,
                "Rejected node result with invalid executor signature"
            );
            return Err(WorkflowError::SecurityViolation(format!(
                "invalid executor signature for run {} node {} attempt {}",
                result.run_id, result.node_id, result.attempt
            )));
        }

        let run_id = result.run_id.clone();
        self.handle_node_result(&run_id, result).await
    }

    /// Untrusted entry point for external signal senders
    pub async fn on_external_signal(
        &self,
        run_id: &WorkflowRunId,
        signal: ExternalSignal,
        callback_token: &str,
    ) -> WorkflowResult<()> {
        let registration = match self.callbacks.verify_for_run(callback_token, run_id).await? {
            Some(registration) => registration,
            None => {
                tracing::warn!(
                    target: SECURITY_TARGET,
                    run_id = %run_id,
                    signal = %signal.signal_type,
                    "Rejected external signal with invalid callback token"
                );
                return Err(WorkflowError::SecurityViolation(format!(
                    "invalid callback token for run {run_id}"
                )));
            }
        };

        if registration.node_id != signal.target_node_id {
            tracing::warn!(
                target: SECURITY_TARGET,
                run_id = %run_id,
                registered_node = %registration.node_id,
                target_node = %signal.target_node_id,
                "Rejected external signal for a node the callback does not cover"
            );
            return Err(WorkflowError::SecurityViolation(format!(
                "callback token does not cover node {}",
                signal.target_node_id
            )));
        }

        let signal = Signal::from_external(signal, self.clock.now());
        self.signal(run_id, signal).await
    }

    /// Authorize an external sender to signal one run/node
    pub async fn register_callback(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        config: CallbackConfig,
    ) -> WorkflowResult<CallbackRegistration> {
        self.ensure_exists(run_id).await?;
        self.callbacks.register(run_id, node_id, config).await
    }

    pub async fn invalidate_callback(&self, token: &str) -> WorkflowResult<bool> {
        self.callbacks.invalidate(token).await
    }

    /// Drop execution tokens whose lease has passed
    pub async fn purge_expired_tokens(&self) -> WorkflowResult<u64> {
        self.tokens.purge_expired(self.clock.now()).await
    }

    async fn ensure_exists(&self, run_id: &WorkflowRunId) -> WorkflowResult<()> {
        match self.runs.find_by_id(run_id).await? {
            Some(_) => Ok(()),
            None => Err(WorkflowError::RunNotFound(run_id.clone())),
        }
    }
}

fn ensure_tenant(run: &WorkflowRun, tenant_id: &TenantId) -> WorkflowResult<()> {
    if run.belongs_to(tenant_id) {
        Ok(())
    } else {
        tracing::debug!(run_id = %run.id, tenant_id = %tenant_id, "Run requested by another tenant");
        Err(WorkflowError::RunNotFound(run.id.clone()))
    }
}
