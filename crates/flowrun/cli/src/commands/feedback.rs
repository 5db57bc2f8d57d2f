//! Executor credentials, node results and external signals

use crate::error::{CliError, CliResult};
use crate::output::{self, print_success, print_warning};
use crate::runtime::Runtime;
use chrono::Utc;
use clap::Subcommand;
use flowrun_engine::ExecutionTokenService;
use flowrun_types::*;
use serde_json::Value;

/// Execution token subcommands
#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token for one node attempt
    Issue {
        run_id: String,
        node_id: String,

        #[arg(short, long, default_value_t = 1)]
        attempt: u32,
    },

    /// Compute the signature an executor attaches to a result file
    Sign {
        /// Token value
        #[arg(long)]
        token: String,

        /// Path to the node result (JSON)
        #[arg(short, long)]
        file: String,
    },

    /// Drop tokens whose lease has passed
    Purge,
}

/// Callback subcommands
#[derive(Subcommand)]
pub enum CallbackCommands {
    /// Authorize an external sender to signal one run/node
    Register {
        run_id: String,
        node_id: String,

        /// Where the sender is expected to be reachable
        #[arg(short, long)]
        url: String,

        /// Lifetime in seconds; omit for a token that never expires
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Invalidate a callback token
    Invalidate { token: String },
}

/// Execute a token command
pub async fn execute_token(command: TokenCommands, runtime: &Runtime) -> CliResult<()> {
    match command {
        TokenCommands::Issue {
            run_id,
            node_id,
            attempt,
        } => {
            let token = runtime
                .manager
                .create_execution_token(&WorkflowRunId::new(run_id), &NodeId::new(node_id), attempt)
                .await?;
            output::print_single(&token);
        }

        TokenCommands::Sign { token, file } => {
            let result = read_result(&file)?;
            let now = Utc::now();
            let token = ExecutionToken {
                token,
                run_id: result.run_id.clone(),
                node_id: result.node_id.clone(),
                attempt: result.attempt,
                issued_at: now,
                expires_at: now,
            };
            println!("{}", ExecutionTokenService::sign(&token, &result)?);
        }

        TokenCommands::Purge => {
            let purged = runtime.manager.purge_expired_tokens().await?;
            print_success(&format!("Purged {purged} expired execution tokens"));
        }
    }
    Ok(())
}

/// Submit an executor's node result through the signature-checked entry point
pub async fn execute_report(runtime: &Runtime, file: &str, signature: &str) -> CliResult<()> {
    let result = read_result(file)?;
    let key = format!("{}/{}#{}", result.run_id, result.node_id, result.attempt);
    match runtime
        .manager
        .on_node_execution_completed(result, signature)
        .await?
    {
        NodeResultOutcome::Applied => print_success(&format!("Applied node result {key}")),
        NodeResultOutcome::Duplicate => {
            print_warning(&format!("Node result {key} was already applied"))
        }
    }
    Ok(())
}

/// Execute a callback command
pub async fn execute_callback(command: CallbackCommands, runtime: &Runtime) -> CliResult<()> {
    match command {
        CallbackCommands::Register {
            run_id,
            node_id,
            url,
            ttl_secs,
        } => {
            let mut config = CallbackConfig::new(url);
            if let Some(ttl) = ttl_secs {
                config = config.with_ttl_secs(ttl);
            }
            let registration = runtime
                .manager
                .register_callback(&WorkflowRunId::new(run_id), &NodeId::new(node_id), config)
                .await?;
            output::print_single(&registration);
        }

        CallbackCommands::Invalidate { token } => {
            if runtime.manager.invalidate_callback(&token).await? {
                print_success("Callback token invalidated");
            } else {
                print_warning("No such callback token");
            }
        }
    }
    Ok(())
}

/// Deliver an external signal through the callback-token entry point
pub async fn execute_signal(
    runtime: &Runtime,
    run_id: String,
    token: &str,
    signal_type: String,
    node_id: String,
    payload: Option<String>,
) -> CliResult<()> {
    let payload = match payload {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Value::Null,
    };
    let signal = ExternalSignal::new(signal_type, NodeId::new(node_id), payload);
    runtime
        .manager
        .on_external_signal(&WorkflowRunId::new(run_id), signal, token)
        .await?;
    print_success("Signal accepted");
    Ok(())
}

fn read_result(path: &str) -> CliResult<NodeExecutionResult> {
    let contents = std::fs::read_to_string(path)?;
    let result: NodeExecutionResult = serde_json::from_str(&contents)?;
    if result.attempt == 0 {
        return Err(CliError::InvalidInput(
            "node result attempt must be at least 1".to_string(),
        ));
    }
    Ok(result)
}
