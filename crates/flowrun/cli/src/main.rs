//! flowrunctl - operator command line for the Flowrun orchestrator
//!
//! Drives the orchestrator in-process against the configured storage:
//! - Create, transition and inspect workflow runs
//! - Issue execution tokens and submit signed node results
//! - Register callbacks and deliver external signals
//!
//! With the default in-memory backend every invocation starts empty; point
//! `storage` at PostgreSQL (built with the `postgres` feature) to share state
//! between invocations and with running orchestrator instances.

use clap::{Parser, Subcommand};
use flowrun_types::TenantId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod error;
mod output;
mod runtime;

use commands::{definition, demo, feedback, run};
use config::FlowrunConfig;
use runtime::Runtime;

/// flowrunctl CLI
#[derive(Parser)]
#[command(name = "flowrunctl")]
#[command(about = "Flowrun - workflow run orchestrator CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FLOWRUN_CONFIG")]
    config: Option<String>,

    /// Tenant the command acts for
    #[arg(short, long, global = true, env = "FLOWRUN_TENANT", default_value = "default")]
    tenant: String,

    /// Output format for listings
    #[arg(short, long, global = true, default_value = "table")]
    output: output::OutputFormat,

    /// Log level, overrides the configured one
    #[arg(long, env = "FLOWRUN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run lifecycle and queries
    Run {
        #[command(subcommand)]
        command: run::RunCommands,
    },

    /// Execution tokens for executors
    Token {
        #[command(subcommand)]
        command: feedback::TokenCommands,
    },

    /// Submit a signed node result
    Report {
        /// Path to the node result (JSON)
        #[arg(short, long)]
        file: String,

        /// Executor signature over the result
        #[arg(short, long)]
        signature: String,
    },

    /// Callback registrations for external senders
    Callback {
        #[command(subcommand)]
        command: feedback::CallbackCommands,
    },

    /// Deliver an external signal
    Signal {
        run_id: String,

        /// Callback token
        #[arg(long)]
        token: String,

        /// Signal type
        #[arg(long = "type")]
        signal_type: String,

        /// Target node
        #[arg(short, long)]
        node: String,

        /// JSON payload
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// List the definitions loaded from the definitions file
    Definitions,

    /// Walk one run through its whole lifecycle
    Demo(demo::DemoArgs),

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = FlowrunConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level.clone() {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    init_tracing(&config);

    if let Commands::Config = cli.command {
        output::print_single(&config);
        return Ok(());
    }

    tracing::debug!(
        instance_id = %config.orchestrator.instance_id,
        storage = config.storage.kind(),
        "Starting flowrunctl"
    );
    let runtime = Runtime::connect(&config).await?;
    let tenant = TenantId::new(cli.tenant);
    let format = cli.output;

    let outcome = match cli.command {
        Commands::Run { command } => run::execute(command, &runtime, &tenant, format).await,
        Commands::Token { command } => feedback::execute_token(command, &runtime).await,
        Commands::Report { file, signature } => {
            feedback::execute_report(&runtime, &file, &signature).await
        }
        Commands::Callback { command } => feedback::execute_callback(command, &runtime).await,
        Commands::Signal {
            run_id,
            token,
            signal_type,
            node,
            payload,
        } => feedback::execute_signal(&runtime, run_id, &token, signal_type, node, payload).await,
        Commands::Definitions => definition::list(&runtime, &tenant, format),
        Commands::Demo(args) => demo::execute(args, &runtime, &tenant, format).await,
        Commands::Config => Ok(()),
    };

    if let Err(err) = outcome {
        output::print_error(&err.to_string());
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(config: &FlowrunConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
