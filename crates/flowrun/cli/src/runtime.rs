//! Wires configuration into a running orchestrator

use crate::config::{FlowrunConfig, StorageConfig};
use crate::error::{CliError, CliResult};
use flowrun_engine::{InMemoryDefinitionRegistry, WorkflowRunManager};
use flowrun_storage::InMemoryRunStorage;
use flowrun_types::{NodeId, TenantId, WorkflowDefinition, WorkflowDefinitionId};
use serde::Deserialize;
use std::sync::Arc;

/// A definition as written in the definitions file
#[derive(Debug, Deserialize)]
pub struct DefinitionEntry {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub nodes: Vec<String>,
}

fn default_version() -> u32 {
    1
}

impl From<DefinitionEntry> for WorkflowDefinition {
    fn from(entry: DefinitionEntry) -> Self {
        let mut definition = WorkflowDefinition::new(entry.name, TenantId::new(entry.tenant_id))
            .with_id(WorkflowDefinitionId::new(entry.id))
            .with_version(entry.version);
        definition.nodes = entry.nodes.into_iter().map(NodeId::new).collect();
        definition
    }
}

/// Orchestrator plus the registry it was built over
pub struct Runtime {
    pub manager: WorkflowRunManager,
    pub definitions: Arc<InMemoryDefinitionRegistry>,
}

impl Runtime {
    pub async fn connect(config: &FlowrunConfig) -> CliResult<Self> {
        let definitions = Arc::new(load_definitions(config.definitions_file.as_deref())?);

        let manager = match &config.storage {
            StorageConfig::Memory => {
                tracing::debug!("Using in-memory storage; state ends with this process");
                WorkflowRunManager::builder(Arc::new(InMemoryRunStorage::new()), definitions.clone())
                    .config(config.orchestrator.clone())
                    .build()
            }
            #[cfg(feature = "postgres")]
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => {
                let storage = flowrun_storage::postgres::PostgresRunStorage::connect_with_options(
                    url,
                    *max_connections,
                    *connect_timeout_secs,
                )
                .await?;
                tracing::info!(max_connections = *max_connections, "Connected to PostgreSQL storage");
                WorkflowRunManager::builder(Arc::new(storage), definitions.clone())
                    .config(config.orchestrator.clone())
                    .build()
            }
            #[cfg(not(feature = "postgres"))]
            StorageConfig::Postgres { .. } => {
                return Err(CliError::Config(
                    "postgres storage requires flowrunctl built with the `postgres` feature"
                        .to_string(),
                ));
            }
        };

        Ok(Self {
            manager,
            definitions,
        })
    }
}

/// Read the definitions file, if any, into a fresh registry.
pub fn load_definitions(path: Option<&str>) -> CliResult<InMemoryDefinitionRegistry> {
    let registry = InMemoryDefinitionRegistry::new();
    let Some(path) = path else {
        return Ok(registry);
    };

    let contents = std::fs::read_to_string(path)
        .map_err(|e| CliError::Config(format!("cannot read definitions file {path}: {e}")))?;
    let entries: Vec<DefinitionEntry> = serde_json::from_str(&contents)?;
    let count = entries.len();
    for entry in entries {
        registry.register(entry.into())?;
    }

    tracing::debug!(path, count, "Workflow definitions loaded");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_become_definitions() {
        let entry: DefinitionEntry = serde_json::from_str(
            r#"{"id": "invoice-v1", "tenant_id": "acme", "name": "invoice", "nodes": ["n1", "n2"]}"#,
        )
        .unwrap();
        let definition = WorkflowDefinition::from(entry);
        assert_eq!(definition.id.as_str(), "invoice-v1");
        assert_eq!(definition.version, 1);
        assert!(definition.has_node(&NodeId::new("n2")));
    }

    #[test]
    fn missing_definitions_file_is_a_config_error() {
        let err = load_definitions(Some("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn no_file_gives_an_empty_registry() {
        assert_eq!(load_definitions(None).unwrap().count(), 0);
    }
}
