//! Execution history: records every state change of a run
//!
//! Events are appended while the run's lease is held, so the stored order is
//! the order in which operations were serialized. The same repository fronts
//! the node-result idempotency ledger.

use chrono::{DateTime, Utc};
use flowrun_storage::ExecutionHistoryStore;
use flowrun_types::{
    ErrorInfo, EventAppend, ExecutionEvent, ExecutionEventType, ExecutionHistory,
    NodeExecutionResult, NodeId, RunStatus, Signal, WorkflowDefinitionId, WorkflowResult,
    WorkflowRunId,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Append-only event log plus the idempotency ledger
#[derive(Clone)]
pub struct ExecutionHistoryRepository {
    store: Arc<dyn ExecutionHistoryStore>,
}

impl ExecutionHistoryRepository {
    pub fn new(store: Arc<dyn ExecutionHistoryStore>) -> Self {
        Self { store }
    }

    /// Append one event
    pub async fn append(
        &self,
        run_id: &WorkflowRunId,
        event_type: ExecutionEventType,
        message: impl Into<String>,
        metadata: Value,
        timestamp: DateTime<Utc>,
    ) -> WorkflowResult<ExecutionEvent> {
        let event = self
            .store
            .append_event(EventAppend {
                run_id: run_id.clone(),
                event_type,
                message: message.into(),
                metadata,
                timestamp,
            })
            .await?;
        tracing::trace!(
            run_id = %run_id,
            sequence = event.sequence,
            event = %event.event_type,
            "History recorded"
        );
        Ok(event)
    }

    /// Full ordered history of a run
    pub async fn load(&self, run_id: &WorkflowRunId) -> WorkflowResult<ExecutionHistory> {
        let events = self.store.load_events(run_id).await?;
        Ok(ExecutionHistory::new(run_id.clone(), events))
    }

    /// Atomic check-and-mark. `true` means this attempt was already processed.
    pub async fn is_node_result_processed(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> WorkflowResult<bool> {
        Ok(self
            .store
            .check_and_mark_node_result(run_id, node_id, attempt, now)
            .await?)
    }

    /// Undo a ledger mark after a transient failure so the result can be redelivered.
    pub async fn release_node_result(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> WorkflowResult<()> {
        Ok(self.store.clear_node_result(run_id, node_id, attempt).await?)
    }

    // ── Typed helpers ────────────────────────────────────────────────

    pub async fn record_run_created(
        &self,
        run_id: &WorkflowRunId,
        definition_id: &WorkflowDefinitionId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<ExecutionEvent> {
        self.append(
            run_id,
            ExecutionEventType::RunCreated,
            format!("Run created from definition {definition_id}"),
            json!({ "definition_id": definition_id.as_str() }),
            now,
        )
        .await
    }

    /// Record a status change. `extra` fields are merged into the metadata.
    pub async fn record_status_changed(
        &self,
        run_id: &WorkflowRunId,
        from: RunStatus,
        to: RunStatus,
        extra: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<ExecutionEvent> {
        let mut metadata = Map::new();
        metadata.insert("from".into(), Value::String(from.as_str().into()));
        metadata.insert("to".into(), Value::String(to.as_str().into()));
        metadata.extend(extra);

        self.append(
            run_id,
            ExecutionEventType::StatusChanged,
            format!("Status changed {from} -> {to}"),
            Value::Object(metadata),
            now,
        )
        .await
    }

    pub async fn record_node_result(
        &self,
        result: &NodeExecutionResult,
        now: DateTime<Utc>,
    ) -> WorkflowResult<ExecutionEvent> {
        let message = if result.is_success() {
            format!("Node '{}' attempt {} completed", result.node_id, result.attempt)
        } else {
            format!("Node '{}' attempt {} failed", result.node_id, result.attempt)
        };
        self.append(
            &result.run_id,
            ExecutionEventType::NodeCompleted,
            message,
            json!({
                "node_id": result.node_id.as_str(),
                "attempt": result.attempt,
                "success": result.is_success(),
                "error_code": result.error.as_ref().map(|e| e.code.clone()),
                "output_keys": result.outputs.keys().collect::<Vec<_>>(),
            }),
            now,
        )
        .await
    }

    pub async fn record_run_completed(
        &self,
        run_id: &WorkflowRunId,
        outputs: &BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<ExecutionEvent> {
        self.append(
            run_id,
            ExecutionEventType::RunCompleted,
            "Run completed",
            json!({
                "from": RunStatus::Running.as_str(),
                "to": RunStatus::Completed.as_str(),
                "output_keys": outputs.keys().collect::<Vec<_>>(),
            }),
            now,
        )
        .await
    }

    pub async fn record_run_failed(
        &self,
        run_id: &WorkflowRunId,
        error: &ErrorInfo,
        now: DateTime<Utc>,
    ) -> WorkflowResult<ExecutionEvent> {
        self.append(
            run_id,
            ExecutionEventType::RunFailed,
            format!("Run failed: {error}"),
            json!({
                "from": RunStatus::Running.as_str(),
                "to": RunStatus::Failed.as_str(),
                "error_code": error.code,
                "error_message": error.message,
            }),
            now,
        )
        .await
    }

    pub async fn record_compensation_failed(
        &self,
        run_id: &WorkflowRunId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> WorkflowResult<ExecutionEvent> {
        self.append(
            run_id,
            ExecutionEventType::CompensationFailed,
            "Compensation failed",
            json!({ "reason": reason }),
            now,
        )
        .await
    }

    pub async fn record_signal(
        &self,
        run_id: &WorkflowRunId,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> WorkflowResult<ExecutionEvent> {
        self.append(
            run_id,
            ExecutionEventType::SignalReceived,
            format!("Signal '{}' received for node '{}'", signal.name, signal.target_node_id),
            json!({
                "signal": signal.name,
                "target_node_id": signal.target_node_id.as_str(),
                "payload": signal.payload,
                "signal_timestamp": signal.timestamp,
            }),
            now,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_storage::InMemoryRunStorage;

    #[tokio::test]
    async fn status_change_metadata_carries_extra_fields() {
        let history = ExecutionHistoryRepository::new(Arc::new(InMemoryRunStorage::new()));
        let run_id = WorkflowRunId::new("r1");
        let mut extra = Map::new();
        extra.insert("reason".into(), json!("awaiting-approval"));

        history
            .record_status_changed(&run_id, RunStatus::Running, RunStatus::Suspended, extra, Utc::now())
            .await
            .unwrap();

        let loaded = history.load(&run_id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        let event = &loaded.events[0];
        assert_eq!(event.metadata_str("to"), Some("SUSPENDED"));
        assert_eq!(event.metadata_str("reason"), Some("awaiting-approval"));
    }

    #[tokio::test]
    async fn node_result_metadata_records_the_attempt() {
        let history = ExecutionHistoryRepository::new(Arc::new(InMemoryRunStorage::new()));
        let result = NodeExecutionResult::failed(
            WorkflowRunId::new("r1"),
            NodeId::new("n1"),
            3,
            ErrorInfo::new("E_TIMEOUT", "took too long"),
        );
        let event = history.record_node_result(&result, Utc::now()).await.unwrap();
        assert_eq!(event.event_type, ExecutionEventType::NodeCompleted);
        assert_eq!(event.metadata["attempt"], json!(3));
        assert_eq!(event.metadata["success"], json!(false));
        assert_eq!(event.metadata_str("error_code"), Some("E_TIMEOUT"));
    }

    #[tokio::test]
    async fn ledger_check_is_check_and_mark() {
        let history = ExecutionHistoryRepository::new(Arc::new(InMemoryRunStorage::new()));
        let run_id = WorkflowRunId::new("r1");
        let node = NodeId::new("n1");
        assert!(!history.is_node_result_processed(&run_id, &node, 1, Utc::now()).await.unwrap());
        assert!(history.is_node_result_processed(&run_id, &node, 1, Utc::now()).await.unwrap());
    }
}
