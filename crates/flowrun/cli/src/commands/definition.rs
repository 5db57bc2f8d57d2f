//! Workflow definition commands

use crate::error::CliResult;
use crate::output::{self, OutputFormat};
use crate::runtime::Runtime;
use flowrun_types::{TenantId, WorkflowDefinition};
use serde::Serialize;
use tabled::Tabled;

/// Table row for definition display
#[derive(Debug, Serialize, Tabled)]
struct DefinitionRow {
    id: String,
    name: String,
    version: u32,
    nodes: String,
}

impl From<WorkflowDefinition> for DefinitionRow {
    fn from(definition: WorkflowDefinition) -> Self {
        Self {
            id: definition.id.to_string(),
            name: definition.name,
            version: definition.version,
            nodes: definition
                .nodes
                .iter()
                .map(|n| n.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// List the definitions a tenant can start runs from
pub fn list(runtime: &Runtime, tenant: &TenantId, format: OutputFormat) -> CliResult<()> {
    let rows: Vec<DefinitionRow> = runtime
        .definitions
        .list_for_tenant(tenant)?
        .into_iter()
        .map(DefinitionRow::from)
        .collect();
    output::print_output(rows, format);
    Ok(())
}
