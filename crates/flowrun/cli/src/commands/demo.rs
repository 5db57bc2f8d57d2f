//! End-to-end walk through one run against the configured backend

use crate::error::CliResult;
use crate::output::{self, print_success, OutputFormat};
use crate::runtime::Runtime;
use clap::Args;
use flowrun_engine::ExecutionTokenService;
use flowrun_types::*;
use serde_json::json;
use std::collections::BTreeMap;

const DEMO_DEFINITION: &str = "flowrunctl-demo";

/// Options for the demo walk-through
#[derive(Args)]
pub struct DemoArgs {
    /// Number of nodes the demo definition has
    #[arg(long, default_value_t = 3)]
    nodes: usize,
}

/// Create a run, feed it signed node results (one of them twice), suspend it
/// on an external approval, deliver that approval, and complete it.
pub async fn execute(
    args: DemoArgs,
    runtime: &Runtime,
    tenant: &TenantId,
    format: OutputFormat,
) -> CliResult<()> {
    let manager = &runtime.manager;

    let definition = match runtime.definitions.latest_by_name(tenant, DEMO_DEFINITION) {
        Some(existing) => existing,
        None => {
            let definition = (1..=args.nodes.max(1)).fold(
                WorkflowDefinition::new(DEMO_DEFINITION, tenant.clone()),
                |def, i| def.with_node(format!("step-{i}")),
            );
            runtime.definitions.register(definition.clone())?;
            definition
        }
    };

    let run = manager
        .create_run(&definition.id, tenant, BTreeMap::from([("demo".to_string(), json!(true))]))
        .await?;
    manager.start_run(&run.id, tenant).await?;
    print_success(&format!("Run {} started", run.id));

    for (index, node) in definition.nodes.iter().enumerate() {
        let token = manager.create_execution_token(&run.id, node, 1).await?;
        let result = NodeExecutionResult::completed(run.id.clone(), node.clone(), 1)
            .with_output(format!("{node}_done"), json!(index + 1));
        let signature = ExecutionTokenService::sign(&token, &result)?;

        let outcome = manager
            .on_node_execution_completed(result.clone(), &signature)
            .await?;
        if index == 0 {
            let replay = manager
                .on_node_execution_completed(result, &signature)
                .await?;
            print_success(&format!("Node {node}: {outcome:?}, redelivery: {replay:?}"));
        } else {
            print_success(&format!("Node {node}: {outcome:?}"));
        }
    }

    let approval_node = NodeId::new("approval");
    manager
        .suspend_run(&run.id, tenant, "awaiting approval", Some(approval_node.clone()))
        .await?;
    let callback = manager
        .register_callback(
            &run.id,
            &approval_node,
            CallbackConfig::new("https://approvals.invalid/flowrunctl-demo").with_ttl_secs(300),
        )
        .await?;
    manager
        .on_external_signal(
            &run.id,
            ExternalSignal::new("approved", approval_node, json!({ "by": "flowrunctl" })),
            &callback.token,
        )
        .await?;
    manager
        .resume_run(&run.id, tenant, BTreeMap::from([("approved".to_string(), json!(true))]))
        .await?;
    manager.invalidate_callback(&callback.token).await?;

    let run = manager
        .complete_run(&run.id, tenant, BTreeMap::from([("result".to_string(), json!("ok"))]))
        .await?;
    print_success(&format!("Run {} is {} at version {}", run.id, run.status, run.version));

    let history = manager.get_execution_history(&run.id, tenant).await?;
    let rows: Vec<HistoryRow> = history.events.into_iter().map(HistoryRow::from).collect();
    output::print_output(rows, format);
    Ok(())
}

#[derive(Debug, serde::Serialize, tabled::Tabled)]
struct HistoryRow {
    seq: u64,
    event: String,
    message: String,
}

impl From<ExecutionEvent> for HistoryRow {
    fn from(event: ExecutionEvent) -> Self {
        Self {
            seq: event.sequence,
            event: event.event_type.to_string(),
            message: event.message,
        }
    }
}
