//! Run lifecycle through the manager façade.

mod common;

use common::{outputs, Harness, RecordingCompensation};
use flowrun_engine::CompensationError;
use flowrun_storage::InMemoryRunStorage;
use flowrun_types::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_moves_created_run_to_running_with_one_status_event() {
    let h = Harness::new();
    let run = h.created_run().await;

    let started = h.manager.start_run(&run.id, &h.tenant).await.unwrap();
    assert_eq!(started.status, RunStatus::Running);
    assert!(started.started_at.is_some());

    let history = h.history(&run.id).await;
    let changes = history.of_type(ExecutionEventType::StatusChanged);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].metadata_str("to"), Some("RUNNING"));
}

#[tokio::test]
async fn suspend_then_resume_round_trips_through_suspended() {
    let h = Harness::new();
    let run = h.running_run().await;

    let suspended = h
        .manager
        .suspend_run(
            &run.id,
            &h.tenant,
            "awaiting-approval",
            Some(NodeId::new("node-7")),
        )
        .await
        .unwrap();
    assert_eq!(suspended.status, RunStatus::Suspended);
    assert_eq!(suspended.waiting_on_node_id, Some(NodeId::new("node-7")));
    assert_eq!(suspended.suspend_reason.as_deref(), Some("awaiting-approval"));

    let resumed = h
        .manager
        .resume_run(&run.id, &h.tenant, BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Running);
    assert_eq!(resumed.waiting_on_node_id, None);
    assert_eq!(resumed.suspend_reason, None);

    let history = h.history(&run.id).await;
    let suspend_event = &history.of_type(ExecutionEventType::StatusChanged)[1];
    assert_eq!(suspend_event.metadata_str("reason"), Some("awaiting-approval"));
    assert_eq!(suspend_event.metadata_str("waiting_on_node_id"), Some("node-7"));
}

#[tokio::test]
async fn resume_data_lands_in_context_and_event() {
    let h = Harness::new();
    let run = h.running_run().await;
    h.manager
        .suspend_run(&run.id, &h.tenant, "approval", None)
        .await
        .unwrap();

    let resumed = h
        .manager
        .resume_run(&run.id, &h.tenant, outputs(&[("approved", json!(true))]))
        .await
        .unwrap();
    assert_eq!(resumed.context.get("approved"), Some(&json!(true)));

    let history = h.history(&run.id).await;
    let last = history.last().unwrap();
    assert_eq!(last.metadata["resume_data"]["approved"], json!(true));
}

#[tokio::test]
async fn fail_compensates_before_persisting_failure() {
    let h = Harness::new();
    let run = h.running_run().await;

    let failed = h
        .manager
        .fail_run(&run.id, &h.tenant, ErrorInfo::new("E1", "boom"))
        .await
        .unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.error.as_ref().map(|e| e.code.as_str()), Some("E1"));

    assert_eq!(h.compensation.call_count(), 1);
    assert_eq!(
        *h.compensation.stored_status_at_call.lock().unwrap(),
        vec![RunStatus::Running]
    );

    let stored = h.manager.get_run(&run.id, &h.tenant).await.unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    let history = h.history(&run.id).await;
    assert_eq!(history.count_of(ExecutionEventType::RunFailed), 1);
    assert_eq!(
        history.of_type(ExecutionEventType::RunFailed)[0].metadata_str("error_code"),
        Some("E1")
    );
}

#[tokio::test]
async fn canceled_run_cannot_be_started() {
    let h = Harness::new();
    let run = h.created_run().await;

    let canceled = h
        .manager
        .cancel_run(&run.id, &h.tenant, "user abort")
        .await
        .unwrap();
    assert_eq!(canceled.status, RunStatus::Canceled);
    assert!(canceled.completed_at.is_some());

    let err = h.manager.start_run(&run.id, &h.tenant).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InvalidStateTransition {
            from: RunStatus::Canceled,
            to: RunStatus::Running
        }
    ));
}

// ---------------------------------------------------------------------------
// Terminal and invalid transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn terminal_runs_reject_every_lifecycle_call_unchanged() {
    let h = Harness::new();
    let run = h.running_run().await;
    h.manager
        .complete_run(&run.id, &h.tenant, outputs(&[("total", json!(42))]))
        .await
        .unwrap();
    let before = h.manager.get_run(&run.id, &h.tenant).await.unwrap();
    let events_before = h.history(&run.id).await.len();

    let m = &h.manager;
    let t = &h.tenant;
    let results = vec![
        m.start_run(&run.id, t).await.map(|_| ()),
        m.suspend_run(&run.id, t, "x", None).await.map(|_| ()),
        m.resume_run(&run.id, t, BTreeMap::new()).await.map(|_| ()),
        m.cancel_run(&run.id, t, "x").await.map(|_| ()),
        m.complete_run(&run.id, t, BTreeMap::new()).await.map(|_| ()),
        m.fail_run(&run.id, t, ErrorInfo::new("E", "x")).await.map(|_| ()),
    ];
    for result in results {
        assert!(matches!(
            result,
            Err(WorkflowError::InvalidStateTransition { .. })
        ));
    }

    let after = h.manager.get_run(&run.id, &h.tenant).await.unwrap();
    assert_eq!(after, before);
    assert_eq!(h.history(&run.id).await.len(), events_before);
    assert_eq!(h.compensation.call_count(), 0);
}

#[tokio::test]
async fn fail_from_created_is_rejected_without_compensation() {
    let h = Harness::new();
    let run = h.created_run().await;

    let err = h
        .manager
        .fail_run(&run.id, &h.tenant, ErrorInfo::new("E1", "boom"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InvalidStateTransition {
            from: RunStatus::Created,
            to: RunStatus::Failed
        }
    ));
    assert_eq!(h.compensation.call_count(), 0);
    assert_eq!(
        h.manager.get_run(&run.id, &h.tenant).await.unwrap().status,
        RunStatus::Created
    );
}

#[tokio::test]
async fn complete_merges_final_outputs() {
    let h = Harness::new();
    let run = h.running_run().await;

    let completed = h
        .manager
        .complete_run(&run.id, &h.tenant, outputs(&[("total", json!(42))]))
        .await
        .unwrap();
    assert_eq!(completed.status, RunStatus::Completed);
    assert_eq!(completed.outputs.get("total"), Some(&json!(42)));
    assert_eq!(completed.version, 2);

    let history = h.history(&run.id).await;
    assert_eq!(history.count_of(ExecutionEventType::RunCompleted), 1);
}

#[tokio::test]
async fn validate_transition_is_a_dry_run() {
    let h = Harness::new();
    let run = h.created_run().await;

    let ok = h
        .manager
        .validate_transition(&run.id, &h.tenant, RunStatus::Running)
        .await
        .unwrap();
    assert!(ok.is_valid());

    let bad = h
        .manager
        .validate_transition(&run.id, &h.tenant, RunStatus::Completed)
        .await
        .unwrap();
    assert!(!bad.is_valid());
    assert!(bad.reason.is_some());

    let stored = h.manager.get_run(&run.id, &h.tenant).await.unwrap();
    assert_eq!(stored.status, RunStatus::Created);
    assert_eq!(stored.version, 0);
}

// ---------------------------------------------------------------------------
// Compensation failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_compensation_still_persists_failure() {
    let storage = Arc::new(InMemoryRunStorage::new());
    let compensation = Arc::new(RecordingCompensation::failing(
        storage.clone(),
        CompensationError::StepFailed {
            node_id: "n1".into(),
            message: "refund api down".into(),
        },
    ));
    let h = Harness::with_compensation(storage, compensation);
    let run = h.running_run().await;

    let err = h
        .manager
        .fail_run(&run.id, &h.tenant, ErrorInfo::new("E1", "boom"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::CompensationFailure { .. }));

    let stored = h.manager.get_run(&run.id, &h.tenant).await.unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert!(stored
        .compensation_error
        .as_deref()
        .unwrap()
        .contains("refund api down"));

    let history = h.history(&run.id).await;
    assert_eq!(history.count_of(ExecutionEventType::CompensationFailed), 1);
}

// ---------------------------------------------------------------------------
// Creation, tenancy and queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_run_records_inputs_and_creation_event() {
    let h = Harness::new();
    let run = h
        .manager
        .create_run(
            &h.definition_id,
            &h.tenant,
            outputs(&[("invoice_id", json!("inv-9"))]),
        )
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Created);
    assert_eq!(run.inputs.get("invoice_id"), Some(&json!("inv-9")));

    let history = h.history(&run.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history.events[0].event_type, ExecutionEventType::RunCreated);
}

#[tokio::test]
async fn create_run_for_unknown_or_foreign_definition_fails() {
    let h = Harness::new();
    let err = h
        .manager
        .create_run(
            &WorkflowDefinitionId::new("nope"),
            &h.tenant,
            BTreeMap::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DefinitionNotFound(_)));

    let err = h
        .manager
        .create_run(&h.definition_id, &TenantId::new("globex"), BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DefinitionNotFound(_)));
}

#[tokio::test]
async fn other_tenants_see_run_as_missing() {
    let h = Harness::new();
    let run = h.running_run().await;
    let intruder = TenantId::new("globex");

    assert!(h.manager.get_run(&run.id, &intruder).await.unwrap_err().is_not_found());
    assert!(h.manager.get_snapshot(&run.id, &intruder).await.unwrap_err().is_not_found());
    assert!(h
        .manager
        .get_execution_history(&run.id, &intruder)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(h
        .manager
        .cancel_run(&run.id, &intruder, "hostile")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(h
        .manager
        .validate_transition(&run.id, &intruder, RunStatus::Canceled)
        .await
        .unwrap_err()
        .is_not_found());

    let stored = h.manager.get_run(&run.id, &h.tenant).await.unwrap();
    assert_eq!(stored.status, RunStatus::Running);
}

#[tokio::test]
async fn queries_are_tenant_scoped() {
    let h = Harness::new();
    let running = h.running_run().await;
    let created = h.created_run().await;

    let all = h
        .manager
        .query_runs(&RunQuery::for_tenant(h.tenant.clone()))
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let only_running = h
        .manager
        .query_runs(&RunQuery::for_tenant(h.tenant.clone()).with_status(RunStatus::Running))
        .await
        .unwrap();
    assert_eq!(only_running.len(), 1);
    assert_eq!(only_running[0].run_id, running.id);

    let foreign = h
        .manager
        .query_runs(&RunQuery::for_tenant(TenantId::new("globex")))
        .await
        .unwrap();
    assert!(foreign.is_empty());

    assert_eq!(h.manager.get_active_runs_count(&h.tenant).await.unwrap(), 2);
    h.manager
        .cancel_run(&created.id, &h.tenant, "cleanup")
        .await
        .unwrap();
    assert_eq!(h.manager.get_active_runs_count(&h.tenant).await.unwrap(), 1);

    let snapshot = h.manager.get_snapshot(&running.id, &h.tenant).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Running);
    assert_eq!(snapshot.version, 1);
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let h = Harness::new();
    let err = h
        .manager
        .start_run(&WorkflowRunId::new("ghost"), &h.tenant)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::RunNotFound(_)));
}
