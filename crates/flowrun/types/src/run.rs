//! Workflow runs: the aggregate root owned by the orchestrator
//!
//! A `WorkflowRun` carries the lifecycle status of one execution of a
//! definition, the outputs accumulated from its nodes, and the timestamps of
//! each lifecycle transition. Every mutating method checks the transition
//! table in [`RunStatus::allowed_targets`] first and leaves the run untouched
//! when the move is not allowed.

use crate::{
    ErrorInfo, NodeId, NodeResultStatus, NodeRunState, RunSnapshot, RunStatus, TenantId,
    WorkflowDefinitionId, WorkflowError, WorkflowResult, WorkflowRunId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One run of a workflow definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique run identifier
    pub id: WorkflowRunId,
    /// The definition this run was materialised from
    pub definition_id: WorkflowDefinitionId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Current lifecycle status
    pub status: RunStatus,
    /// Node the run is waiting on (only while suspended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_on_node_id: Option<NodeId>,
    /// Why the run was suspended (only while suspended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_reason: Option<String>,
    /// Inputs supplied when the run was created
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Outputs accumulated from nodes and from completion
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Data merged in on resume, readable by collaborators
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    /// Latest applied result per node
    #[serde(default)]
    pub node_states: BTreeMap<NodeId, NodeRunState>,
    /// Failure cause (only when failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Set when the compensation pass of a failed run did not succeed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped on every persisted update
    #[serde(default)]
    pub version: u64,
}

impl WorkflowRun {
    /// Create a new run in `CREATED`
    pub fn new(definition_id: WorkflowDefinitionId, tenant_id: TenantId, now: DateTime<Utc>) -> Self {
        Self {
            id: WorkflowRunId::generate(),
            definition_id,
            tenant_id,
            status: RunStatus::Created,
            waiting_on_node_id: None,
            suspend_reason: None,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            context: BTreeMap::new(),
            node_states: BTreeMap::new(),
            error: None,
            compensation_error: None,
            created_at: now,
            started_at: None,
            suspended_at: None,
            completed_at: None,
            updated_at: now,
            version: 0,
        }
    }

    pub fn with_id(mut self, id: WorkflowRunId) -> Self {
        self.id = id;
        self
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    /// Move to `to` if the transition table allows it. Returns the previous status.
    fn transition(&mut self, to: RunStatus, now: DateTime<Utc>) -> WorkflowResult<RunStatus> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(WorkflowError::InvalidStateTransition { from, to });
        }
        self.status = to;
        if to != RunStatus::Suspended {
            self.waiting_on_node_id = None;
            self.suspend_reason = None;
        }
        self.updated_at = now;
        Ok(from)
    }

    /// CREATED → RUNNING
    pub fn start(&mut self, now: DateTime<Utc>) -> WorkflowResult<()> {
        if self.status != RunStatus::Created {
            return Err(WorkflowError::InvalidStateTransition {
                from: self.status,
                to: RunStatus::Running,
            });
        }
        self.transition(RunStatus::Running, now)?;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    /// RUNNING → SUSPENDED
    pub fn suspend(
        &mut self,
        reason: impl Into<String>,
        waiting_on_node_id: Option<NodeId>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        self.transition(RunStatus::Suspended, now)?;
        self.suspend_reason = Some(reason.into());
        self.waiting_on_node_id = waiting_on_node_id;
        self.suspended_at = Some(now);
        Ok(())
    }

    /// SUSPENDED → RUNNING, merging `resume_data` into the run context
    pub fn resume(
        &mut self,
        resume_data: BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        if self.status != RunStatus::Suspended {
            return Err(WorkflowError::InvalidStateTransition {
                from: self.status,
                to: RunStatus::Running,
            });
        }
        self.transition(RunStatus::Running, now)?;
        self.context.extend(resume_data);
        Ok(())
    }

    /// Any non-terminal status → CANCELED
    pub fn cancel(&mut self, now: DateTime<Utc>) -> WorkflowResult<()> {
        self.transition(RunStatus::Canceled, now)?;
        self.completed_at.get_or_insert(now);
        Ok(())
    }

    /// RUNNING → COMPLETED, merging the final outputs
    pub fn complete(
        &mut self,
        outputs: BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        self.transition(RunStatus::Completed, now)?;
        self.outputs.extend(outputs);
        self.completed_at.get_or_insert(now);
        Ok(())
    }

    /// RUNNING → FAILED
    pub fn fail(&mut self, error: ErrorInfo, now: DateTime<Utc>) -> WorkflowResult<()> {
        self.transition(RunStatus::Failed, now)?;
        self.error = Some(error);
        self.completed_at.get_or_insert(now);
        Ok(())
    }

    /// Record a successful node attempt and merge its outputs into the run.
    pub fn complete_node(
        &mut self,
        node_id: NodeId,
        attempt: u32,
        outputs: BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        self.ensure_accepts_node_results()?;
        self.outputs
            .extend(outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.node_states.insert(
            node_id,
            NodeRunState {
                attempt,
                status: NodeResultStatus::Completed,
                outputs,
                error: None,
                recorded_at: now,
            },
        );
        self.updated_at = now;
        Ok(())
    }

    /// Record a failed node attempt. The run itself stays in its status;
    /// failing the run is a separate, explicit decision.
    pub fn fail_node(
        &mut self,
        node_id: NodeId,
        attempt: u32,
        error: Option<ErrorInfo>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        self.ensure_accepts_node_results()?;
        self.node_states.insert(
            node_id,
            NodeRunState {
                attempt,
                status: NodeResultStatus::Failed,
                outputs: BTreeMap::new(),
                error,
                recorded_at: now,
            },
        );
        self.updated_at = now;
        Ok(())
    }

    fn ensure_accepts_node_results(&self) -> WorkflowResult<()> {
        if self.accepts_node_results() {
            Ok(())
        } else {
            Err(WorkflowError::RunNotActive {
                run_id: self.id.clone(),
                status: self.status,
            })
        }
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Node results are applied while the run is running or suspended.
    pub fn accepts_node_results(&self) -> bool {
        matches!(self.status, RunStatus::Running | RunStatus::Suspended)
    }

    pub fn belongs_to(&self, tenant_id: &TenantId) -> bool {
        &self.tenant_id == tenant_id
    }

    pub fn node_state(&self, node_id: &NodeId) -> Option<&NodeRunState> {
        self.node_states.get(node_id)
    }

    /// Read-only projection of this run
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.id.clone(),
            definition_id: self.definition_id.clone(),
            tenant_id: self.tenant_id.clone(),
            status: self.status,
            waiting_on_node_id: self.waiting_on_node_id.clone(),
            suspend_reason: self.suspend_reason.clone(),
            error: self.error.clone(),
            output_count: self.outputs.len(),
            completed_node_count: self
                .node_states
                .values()
                .filter(|s| s.status == NodeResultStatus::Completed)
                .count(),
            created_at: self.created_at,
            started_at: self.started_at,
            suspended_at: self.suspended_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_run() -> WorkflowRun {
        WorkflowRun::new(
            WorkflowDefinitionId::new("def-1"),
            TenantId::new("acme"),
            Utc::now(),
        )
    }

    #[test]
    fn test_start_sets_started_at_once() {
        let mut run = make_run();
        let t0 = Utc::now();
        run.start(t0).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.started_at, Some(t0));

        run.suspend("wait", None, Utc::now()).unwrap();
        run.resume(BTreeMap::new(), Utc::now()).unwrap();
        assert_eq!(run.started_at, Some(t0));
    }

    #[test]
    fn test_suspend_records_waiting_node_and_resume_clears_it() {
        let mut run = make_run();
        run.start(Utc::now()).unwrap();
        run.suspend("awaiting-approval", Some(NodeId::new("node-7")), Utc::now())
            .unwrap();
        assert_eq!(run.waiting_on_node_id, Some(NodeId::new("node-7")));
        assert_eq!(run.suspend_reason.as_deref(), Some("awaiting-approval"));
        assert!(run.suspended_at.is_some());

        let mut data = BTreeMap::new();
        data.insert("approved".to_string(), json!(true));
        run.resume(data, Utc::now()).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.waiting_on_node_id.is_none());
        assert!(run.suspend_reason.is_none());
        assert_eq!(run.context.get("approved"), Some(&json!(true)));
    }

    #[test]
    fn test_start_is_not_resume() {
        let mut run = make_run();
        run.start(Utc::now()).unwrap();
        run.suspend("wait", None, Utc::now()).unwrap();
        let err = run.start(Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidStateTransition {
                from: RunStatus::Suspended,
                to: RunStatus::Running
            }
        ));
        assert_eq!(run.status, RunStatus::Suspended);
    }

    #[test]
    fn test_invalid_transition_leaves_run_untouched() {
        let mut run = make_run();
        let before = run.clone();
        assert!(run.complete(BTreeMap::new(), Utc::now()).is_err());
        assert!(run.suspend("x", None, Utc::now()).is_err());
        assert!(run.resume(BTreeMap::new(), Utc::now()).is_err());
        assert!(run
            .fail(ErrorInfo::new("E", "boom"), Utc::now())
            .is_err());
        assert_eq!(run, before);
    }

    #[test]
    fn test_terminal_run_rejects_everything() {
        let mut run = make_run();
        run.cancel(Utc::now()).unwrap();
        let before = run.clone();
        assert!(run.start(Utc::now()).is_err());
        assert!(run.cancel(Utc::now()).is_err());
        assert!(run
            .complete_node(NodeId::new("n1"), 1, BTreeMap::new(), Utc::now())
            .is_err());
        assert_eq!(run, before);
    }

    #[test]
    fn test_fail_sets_error() {
        let mut run = make_run();
        run.start(Utc::now()).unwrap();
        run.fail(ErrorInfo::new("E1", "boom"), Utc::now()).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_ref().map(|e| e.code.as_str()), Some("E1"));
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_complete_node_merges_outputs() {
        let mut run = make_run();
        run.start(Utc::now()).unwrap();
        let mut outputs = BTreeMap::new();
        outputs.insert("x".to_string(), json!(1));
        run.complete_node(NodeId::new("n1"), 1, outputs, Utc::now())
            .unwrap();

        assert_eq!(run.outputs.get("x"), Some(&json!(1)));
        let state = run.node_state(&NodeId::new("n1")).unwrap();
        assert_eq!(state.status, NodeResultStatus::Completed);
        assert_eq!(run.snapshot().completed_node_count, 1);
    }

    #[test]
    fn test_fail_node_keeps_run_running() {
        let mut run = make_run();
        run.start(Utc::now()).unwrap();
        run.fail_node(
            NodeId::new("n2"),
            2,
            Some(ErrorInfo::new("TIMEOUT", "node timed out")),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(run.status, RunStatus::Running);
        let state = run.node_state(&NodeId::new("n2")).unwrap();
        assert_eq!(state.status, NodeResultStatus::Failed);
        assert_eq!(state.attempt, 2);
    }

    #[test]
    fn test_created_run_does_not_accept_node_results() {
        let mut run = make_run();
        let err = run
            .complete_node(NodeId::new("n1"), 1, BTreeMap::new(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::RunNotActive { .. }));
    }

    #[test]
    fn test_serde_round_trip_preserves_state() {
        let mut run = make_run().with_input("doc", json!("doc-1"));
        run.start(Utc::now()).unwrap();
        let json = serde_json::to_string(&run).unwrap();
        let back: WorkflowRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
    }
}
