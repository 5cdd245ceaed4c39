//! `workflow-manager` CLI entry-point.
//!
//! Available sub-commands:
//! - `run`: load a stored workflow and execute it (batch or reactive).
//! - `validate`: check a workflow JSON file and print its execution order.
//! - `import`: store a workflow JSON file for an owner.
//! - `list`: list the workflows stored for an owner.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use components::builtin::{InboxHub, InboxMessage};
use components::ComponentRegistry;
use engine::{EngineConfig, ExecutionPlan, RunMode, WorkflowDefinition, WorkflowEngine};
use store::{FileStore, WorkflowStore};

#[derive(Parser)]
#[command(
    name = "workflow-manager",
    about = "Run event-driven component workflows",
    version
)]
struct Cli {
    /// Directory holding `workflows/` and `setups/`.
    #[arg(long, global = true, env = "WORKFLOW_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Local identity that owns workflows and setup profiles.
    #[arg(long, global = true, env = "WORKFLOW_OWNER", default_value = "default")]
    owner: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a stored workflow.
    Run {
        /// Workflow name.
        #[arg(long)]
        workflow: String,
        /// Inbox channel that stdin lines are delivered to.
        #[arg(long, default_value = "general")]
        channel: String,
        /// Upper bound on each action, in seconds.
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
        action_timeout_secs: u64,
        /// Bounded wait per listener when stopping, in seconds.
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
        stop_timeout_secs: u64,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Store a workflow definition JSON file under its name.
    Import {
        path: PathBuf,
    },
    /// List stored workflows.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = FileStore::new(&cli.data_dir);

    match cli.command {
        Command::Run {
            workflow,
            channel,
            action_timeout_secs,
            stop_timeout_secs,
        } => {
            let config = EngineConfig {
                action_timeout: Duration::from_secs(action_timeout_secs),
                listener_stop_timeout: Duration::from_secs(stop_timeout_secs),
                ..EngineConfig::default()
            };
            run(store, &cli.owner, &workflow, &channel, config).await
        }
        Command::Validate { path } => {
            let definition = read_definition(&path)?;
            let plan = ExecutionPlan::build(&definition)
                .with_context(|| format!("workflow '{}' is invalid", definition.name))?;
            for (alias, producers) in plan.dependencies().ambiguous_aliases() {
                warn!(alias = %alias, ?producers, "alias has several producers");
            }
            println!("✅ Workflow '{}' is valid ({:?} mode).", definition.name, plan.mode());
            println!("Execution order: {:?}", plan.order());
            Ok(())
        }
        Command::Import { path } => {
            let definition = read_definition(&path)?;
            ExecutionPlan::build(&definition)
                .with_context(|| format!("workflow '{}' is invalid", definition.name))?;
            store
                .save_workflow(&cli.owner, &definition.name, &definition.to_value()?)
                .await
                .context("failed to store workflow")?;
            println!("Stored '{}' for {}", definition.name, cli.owner);
            Ok(())
        }
        Command::List => {
            let names = store
                .list_workflows(&cli.owner)
                .await
                .context("failed to list workflows")?;
            if names.is_empty() {
                println!("No workflows stored for {}", cli.owner);
            }
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn read_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let document = serde_json::from_str(&content).context("invalid JSON")?;
    WorkflowDefinition::from_value(document).context("not a workflow definition")
}

async fn run(
    store: FileStore,
    owner: &str,
    workflow: &str,
    channel: &str,
    config: EngineConfig,
) -> Result<()> {
    let hub = InboxHub::new();
    let registry = ComponentRegistry::with_builtins(&hub);
    let engine = WorkflowEngine::new(Arc::new(registry), Arc::new(store), config);

    let run = engine
        .load(owner, workflow)
        .await
        .with_context(|| format!("cannot load workflow '{workflow}'"))?;

    // Replies from `inbox.send_message` are echoed to stdout.
    let printer = tokio::spawn(print_outbox(hub.subscribe_outbox()));
    // Stdin lines become inbox messages for one-shot and persistent triggers alike.
    let mut forwarder = tokio::spawn(forward_stdin(hub, channel.to_owned(), owner.to_owned()));

    let report = run.execute().await;
    print_json(&report)?;

    if report.mode == RunMode::Reactive && report.success {
        info!("listening; type messages on stdin, Ctrl-C or EOF to stop");
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("interrupted");
            }
            _ = &mut forwarder => info!("stdin closed"),
        }
        let cleanup = run.cleanup().await;
        print_json(&cleanup)?;
        info!(cycles = run.cycles_completed(), "reactive workflow stopped");
    }
    forwarder.abort();
    printer.abort();

    if !report.success {
        bail!(
            "workflow '{}' failed: {}",
            workflow,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn forward_stdin(hub: InboxHub, channel: String, user: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                let delivered = hub.publish(InboxMessage::new(channel.as_str(), user.as_str(), line));
                if delivered == 0 {
                    warn!("no inbox trigger is listening; message dropped");
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("failed to read stdin: {e}");
                return;
            }
        }
    }
}

async fn print_outbox(mut outbox: broadcast::Receiver<InboxMessage>) {
    loop {
        match outbox.recv().await {
            Ok(message) => println!("[{}] {}", message.channel, message.message_text),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "outgoing messages were not printed");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
