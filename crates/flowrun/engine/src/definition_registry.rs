//! Definition registry: supplies the topology a run is materialised from
//!
//! Definitions are immutable once registered. To modify one, register a new
//! version under the same name; the registry keeps every version.

use async_trait::async_trait;
use flowrun_types::{
    TenantId, WorkflowDefinition, WorkflowDefinitionId, WorkflowError, WorkflowResult,
};
use std::collections::HashMap;
use std::sync::RwLock;

/// Source of workflow definitions
#[async_trait]
pub trait WorkflowDefinitionRegistry: Send + Sync {
    /// Tenant-scoped lookup. Definitions of other tenants are reported as missing.
    async fn lookup(
        &self,
        definition_id: &WorkflowDefinitionId,
        tenant_id: &TenantId,
    ) -> WorkflowResult<WorkflowDefinition>;
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// All registered definitions, keyed by ID
    definitions: HashMap<WorkflowDefinitionId, WorkflowDefinition>,
    /// Index by (tenant, name) → definition IDs in registration order
    by_name: HashMap<(TenantId, String), Vec<WorkflowDefinitionId>>,
}

/// Process-local registry
#[derive(Debug, Default)]
pub struct InMemoryDefinitionRegistry {
    inner: RwLock<RegistryInner>,
}

impl InMemoryDefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow definition
    ///
    /// Validates the definition before storing. Returns the definition ID.
    pub fn register(&self, definition: WorkflowDefinition) -> WorkflowResult<WorkflowDefinitionId> {
        definition.validate()?;

        let mut inner = self.write()?;
        if inner.definitions.contains_key(&definition.id) {
            return Err(WorkflowError::Conflict(format!(
                "definition {} already registered",
                definition.id
            )));
        }

        let id = definition.id.clone();
        let key = (definition.tenant_id.clone(), definition.name.clone());
        inner.definitions.insert(id.clone(), definition);
        inner.by_name.entry(key).or_default().push(id.clone());

        tracing::info!(definition_id = %id, "Workflow definition registered");
        Ok(id)
    }

    /// Latest version of a tenant's definition by name
    pub fn latest_by_name(&self, tenant_id: &TenantId, name: &str) -> Option<WorkflowDefinition> {
        let inner = self.read().ok()?;
        inner
            .by_name
            .get(&(tenant_id.clone(), name.to_string()))
            .and_then(|ids| ids.last())
            .and_then(|id| inner.definitions.get(id))
            .cloned()
    }

    /// Definitions owned by a tenant
    pub fn list_for_tenant(&self, tenant_id: &TenantId) -> WorkflowResult<Vec<WorkflowDefinition>> {
        let inner = self.read()?;
        Ok(inner
            .definitions
            .values()
            .filter(|d| &d.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    pub fn count(&self) -> usize {
        self.read().map(|inner| inner.definitions.len()).unwrap_or(0)
    }

    /// Remove a definition
    pub fn remove(&self, id: &WorkflowDefinitionId) -> WorkflowResult<WorkflowDefinition> {
        let mut inner = self.write()?;
        let def = inner
            .definitions
            .remove(id)
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.clone()))?;

        let key = (def.tenant_id.clone(), def.name.clone());
        if let Some(ids) = inner.by_name.get_mut(&key) {
            ids.retain(|i| i != id);
            if ids.is_empty() {
                inner.by_name.remove(&key);
            }
        }

        tracing::info!(definition_id = %id, "Workflow definition removed");
        Ok(def)
    }

    fn read(&self) -> WorkflowResult<std::sync::RwLockReadGuard<'_, RegistryInner>> {
        self.inner
            .read()
            .map_err(|_| WorkflowError::Storage("definition registry lock poisoned".to_string()))
    }

    fn write(&self) -> WorkflowResult<std::sync::RwLockWriteGuard<'_, RegistryInner>> {
        self.inner
            .write()
            .map_err(|_| WorkflowError::Storage("definition registry lock poisoned".to_string()))
    }
}

#[async_trait]
impl WorkflowDefinitionRegistry for InMemoryDefinitionRegistry {
    async fn lookup(
        &self,
        definition_id: &WorkflowDefinitionId,
        tenant_id: &TenantId,
    ) -> WorkflowResult<WorkflowDefinition> {
        let inner = self.read()?;
        inner
            .definitions
            .get(definition_id)
            .filter(|d| &d.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| WorkflowError::DefinitionNotFound(definition_id.clone()))
    }
}
