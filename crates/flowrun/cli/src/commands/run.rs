//! Run lifecycle and query commands

use crate::commands::parse_key_value;
use crate::error::CliResult;
use crate::output::{self, print_success, print_warning, OutputFormat};
use crate::runtime::Runtime;
use clap::Subcommand;
use flowrun_types::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tabled::Tabled;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Create a run of a registered definition
    Create {
        /// Definition ID
        definition_id: String,

        /// Run input as key=value (repeatable)
        #[arg(short, long = "input", value_parser = parse_key_value)]
        inputs: Vec<(String, Value)>,

        /// Start the run right away
        #[arg(long)]
        start: bool,
    },

    /// Start a created run
    Start { run_id: String },

    /// Suspend a running run
    Suspend {
        run_id: String,

        /// Why the run is suspended
        #[arg(short, long)]
        reason: String,

        /// Node the run waits on
        #[arg(short, long)]
        waiting_on: Option<String>,
    },

    /// Resume a suspended run
    Resume {
        run_id: String,

        /// Resume data as key=value (repeatable)
        #[arg(short, long = "data", value_parser = parse_key_value)]
        data: Vec<(String, Value)>,
    },

    /// Cancel a run that has not finished
    Cancel {
        run_id: String,

        #[arg(short, long, default_value = "canceled by operator")]
        reason: String,
    },

    /// Complete a running run
    Complete {
        run_id: String,

        /// Final output as key=value (repeatable)
        #[arg(short = 'r', long = "result", value_parser = parse_key_value)]
        outputs: Vec<(String, Value)>,
    },

    /// Fail a running run and compensate
    Fail {
        run_id: String,

        #[arg(long)]
        code: String,

        #[arg(short, long)]
        message: String,
    },

    /// Show a run
    Get {
        run_id: String,

        /// Print the read-only snapshot instead of the full run
        #[arg(long)]
        snapshot: bool,
    },

    /// Show the execution history of a run
    History { run_id: String },

    /// List runs
    List {
        /// Filter by status (repeatable)
        #[arg(short, long)]
        status: Vec<RunStatus>,

        /// Filter by definition
        #[arg(short, long)]
        definition: Option<String>,

        /// Page size, 0 for all
        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Count runs that have not reached a terminal state
    Active,

    /// Check whether a run may move to a status, without changing it
    Validate { run_id: String, target: RunStatus },
}

/// Table row for run listings
#[derive(Debug, Serialize, Tabled)]
struct RunRow {
    id: String,
    definition: String,
    status: String,
    outputs: usize,
    nodes_done: usize,
    created: String,
    version: u64,
}

impl From<RunSnapshot> for RunRow {
    fn from(snapshot: RunSnapshot) -> Self {
        Self {
            id: snapshot.run_id.to_string(),
            definition: snapshot.definition_id.to_string(),
            status: snapshot.status.to_string(),
            outputs: snapshot.output_count,
            nodes_done: snapshot.completed_node_count,
            created: snapshot.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            version: snapshot.version,
        }
    }
}

/// Table row for history listings
#[derive(Debug, Serialize, Tabled)]
struct EventRow {
    seq: u64,
    event: String,
    message: String,
    at: String,
}

impl From<ExecutionEvent> for EventRow {
    fn from(event: ExecutionEvent) -> Self {
        Self {
            seq: event.sequence,
            event: event.event_type.to_string(),
            message: event.message,
            at: event.timestamp.format("%H:%M:%S%.3f").to_string(),
        }
    }
}

fn to_map(pairs: Vec<(String, Value)>) -> BTreeMap<String, Value> {
    pairs.into_iter().collect()
}

/// Execute a run command
pub async fn execute(
    command: RunCommands,
    runtime: &Runtime,
    tenant: &TenantId,
    format: OutputFormat,
) -> CliResult<()> {
    let manager = &runtime.manager;
    match command {
        RunCommands::Create {
            definition_id,
            inputs,
            start,
        } => {
            let definition_id = WorkflowDefinitionId::new(definition_id);
            let mut run = manager
                .create_run(&definition_id, tenant, to_map(inputs))
                .await?;
            if start {
                run = manager.start_run(&run.id, tenant).await?;
            }
            print_success(&format!("Created run {} ({})", run.id, run.status));
            output::print_single(&run);
        }

        RunCommands::Start { run_id } => {
            let run = manager.start_run(&WorkflowRunId::new(run_id), tenant).await?;
            print_success(&format!("Run {} is {}", run.id, run.status));
        }

        RunCommands::Suspend {
            run_id,
            reason,
            waiting_on,
        } => {
            let run = manager
                .suspend_run(
                    &WorkflowRunId::new(run_id),
                    tenant,
                    &reason,
                    waiting_on.map(NodeId::new),
                )
                .await?;
            print_success(&format!("Run {} is {}", run.id, run.status));
        }

        RunCommands::Resume { run_id, data } => {
            let run = manager
                .resume_run(&WorkflowRunId::new(run_id), tenant, to_map(data))
                .await?;
            print_success(&format!("Run {} is {}", run.id, run.status));
        }

        RunCommands::Cancel { run_id, reason } => {
            let run = manager
                .cancel_run(&WorkflowRunId::new(run_id), tenant, &reason)
                .await?;
            print_success(&format!("Run {} is {}", run.id, run.status));
        }

        RunCommands::Complete { run_id, outputs } => {
            let run = manager
                .complete_run(&WorkflowRunId::new(run_id), tenant, to_map(outputs))
                .await?;
            print_success(&format!("Run {} is {}", run.id, run.status));
        }

        RunCommands::Fail {
            run_id,
            code,
            message,
        } => {
            let run_id = WorkflowRunId::new(run_id);
            match manager
                .fail_run(&run_id, tenant, ErrorInfo::new(code, message))
                .await
            {
                Ok(run) => print_success(&format!("Run {} is {}", run.id, run.status)),
                Err(WorkflowError::CompensationFailure { message, .. }) => {
                    print_warning(&format!(
                        "Run {run_id} is FAILED but compensation failed: {message}"
                    ));
                }
                Err(err) => return Err(err.into()),
            }
        }

        RunCommands::Get { run_id, snapshot } => {
            let run_id = WorkflowRunId::new(run_id);
            if snapshot {
                output::print_single(&manager.get_snapshot(&run_id, tenant).await?);
            } else {
                output::print_single(&manager.get_run(&run_id, tenant).await?);
            }
        }

        RunCommands::History { run_id } => {
            let history = manager
                .get_execution_history(&WorkflowRunId::new(run_id), tenant)
                .await?;
            let rows: Vec<EventRow> = history.events.into_iter().map(EventRow::from).collect();
            output::print_output(rows, format);
        }

        RunCommands::List {
            status,
            definition,
            limit,
            offset,
        } => {
            let mut query = RunQuery::for_tenant(tenant.clone()).with_window(limit, offset);
            query.statuses = status;
            if let Some(definition) = definition {
                query = query.with_definition(WorkflowDefinitionId::new(definition));
            }
            let rows: Vec<RunRow> = manager
                .query_runs(&query)
                .await?
                .into_iter()
                .map(RunRow::from)
                .collect();
            output::print_output(rows, format);
        }

        RunCommands::Active => {
            let count = manager.get_active_runs_count(tenant).await?;
            println!("{count}");
        }

        RunCommands::Validate { run_id, target } => {
            let result = manager
                .validate_transition(&WorkflowRunId::new(run_id), tenant, target)
                .await?;
            output::print_single(&result);
        }
    }
    Ok(())
}
