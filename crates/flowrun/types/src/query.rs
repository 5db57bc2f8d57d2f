use crate::{ErrorInfo, NodeId, RunStatus, TenantId, WorkflowDefinitionId, WorkflowRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only projection of a run for dashboards and listings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: WorkflowRunId,
    pub definition_id: WorkflowDefinitionId,
    pub tenant_id: TenantId,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_on_node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspend_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub output_count: usize,
    pub completed_node_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Tenant-scoped run listing filter. Results are newest-first by creation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunQuery {
    pub tenant_id: TenantId,
    /// Empty means any status
    #[serde(default)]
    pub statuses: Vec<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_id: Option<WorkflowDefinitionId>,
    /// Zero means no limit
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl RunQuery {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            statuses: Vec::new(),
            definition_id: None,
            limit: 0,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_definition(mut self, definition_id: WorkflowDefinitionId) -> Self {
        self.definition_id = Some(definition_id);
        self
    }

    pub fn with_window(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Whether a run with these attributes passes the filter
    pub fn matches(
        &self,
        tenant_id: &TenantId,
        status: RunStatus,
        definition_id: &WorkflowDefinitionId,
    ) -> bool {
        &self.tenant_id == tenant_id
            && (self.statuses.is_empty() || self.statuses.contains(&status))
            && self
                .definition_id
                .as_ref()
                .map(|d| d == definition_id)
                .unwrap_or(true)
    }
}
