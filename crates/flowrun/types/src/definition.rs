//! Workflow definitions as seen by the run orchestrator
//!
//! The orchestrator does not execute the node graph, it only needs to know
//! which definition a run belongs to, which tenant owns it, and which node
//! ids exist so feedback can be checked against them. Definitions are
//! immutable once registered. To modify, register a new version.

use crate::{NodeId, TenantId, WorkflowDefinitionId, WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A decomposed workflow definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowDefinitionId,
    pub tenant_id: TenantId,
    pub name: String,
    pub version: u32,
    /// Executable nodes produced by decomposition
    pub nodes: Vec<NodeId>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, tenant_id: TenantId) -> Self {
        Self {
            id: WorkflowDefinitionId::generate(),
            tenant_id,
            name: name.into(),
            version: 1,
            nodes: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: WorkflowDefinitionId) -> Self {
        self.id = id;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.nodes.push(NodeId::new(node_id));
        self
    }

    pub fn has_node(&self, node_id: &NodeId) -> bool {
        self.nodes.contains(node_id)
    }

    /// Validate the definition
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "Workflow definition must have a name".into(),
            ));
        }

        if self.nodes.is_empty() {
            return Err(WorkflowError::Validation(
                "Workflow definition must have at least one node".into(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node) {
                return Err(WorkflowError::Validation(format!(
                    "Duplicate node ID: {}",
                    node
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_definition() {
        let def = WorkflowDefinition::new("Review", TenantId::new("acme"))
            .with_node("fetch")
            .with_node("review");
        assert!(def.validate().is_ok());
        assert!(def.has_node(&NodeId::new("review")));
    }

    #[test]
    fn test_empty_definition_is_invalid() {
        let def = WorkflowDefinition::new("Empty", TenantId::new("acme"));
        assert!(matches!(def.validate(), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn test_duplicate_node_is_invalid() {
        let def = WorkflowDefinition::new("Dup", TenantId::new("acme"))
            .with_node("a")
            .with_node("a");
        assert!(def.validate().is_err());
    }
}
