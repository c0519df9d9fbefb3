use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use weft::config::Config;
use weft::credentials::provider_from_config;
use weft::engine::Executor;
use weft::nodes::{HttpRequestNode, NodeRegistry};
use weft::shutdown::ShutdownCoordinator;
use weft::storage::{Run, RunMode, SqliteStorage};
use weft::triggers::WaitPoller;
use weft::workflow::{parse_workflow_file, validate_workflow_with_registry};

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Node-graph workflow engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Explicit config file (defaults to <config_dir>/weft/config.toml)
    #[arg(long, global = true, env = "WEFT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file
    Run {
        /// Path to workflow YAML or JSON file
        file: PathBuf,
        /// JSON input data
        #[arg(short, long)]
        input: Option<String>,
        /// How the run is recorded
        #[arg(long, value_enum, default_value = "manual")]
        mode: ModeArg,
    },
    /// Resume a waiting run
    Resume {
        run_id: String,
        /// JSON resume data merged over the suspended payload
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Retry a failed run
    Retry { run_id: String },
    /// Show a run with its node records
    Show { run_id: String },
    /// List recent runs
    Runs {
        /// Only runs of this workflow
        #[arg(short, long)]
        workflow: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Validate a workflow file without running it
    Validate { file: PathBuf },
    /// List available node types
    Nodes {
        /// Group by node group
        #[arg(long)]
        grouped: bool,
    },
    /// Resume time-based waits as they come due
    Poll {
        /// Process due waits once and exit
        #[arg(long)]
        once: bool,
    },
    /// Delete runs past the retention window
    Cleanup {
        /// Override engine.retention_days
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Manual,
    Webhook,
    Schedule,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Manual => RunMode::Manual,
            ModeArg::Webhook => RunMode::Webhook,
            ModeArg::Schedule => RunMode::Schedule,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    weft::telemetry::init_logging(&config.logging)?;

    match cli.command {
        Commands::Run { file, input, mode } => {
            cmd_run(&config, &file, input.as_deref(), mode.into()).await?
        }
        Commands::Resume { run_id, data } => cmd_resume(&config, &run_id, data.as_deref()).await?,
        Commands::Retry { run_id } => cmd_retry(&config, &run_id).await?,
        Commands::Show { run_id } => cmd_show(&config, &run_id).await?,
        Commands::Runs { workflow, limit } => cmd_runs(&config, workflow.as_deref(), limit).await?,
        Commands::Validate { file } => cmd_validate(&config, &file)?,
        Commands::Nodes { grouped } => cmd_nodes(&config, grouped),
        Commands::Poll { once } => cmd_poll(&config, once).await?,
        Commands::Cleanup { days } => cmd_cleanup(&config, days).await?,
    }

    Ok(())
}

fn build_registry(config: &Config) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(
        HttpRequestNode::new().allow_internal_urls(config.http.allow_internal_urls),
    ));
    registry
}

fn open_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SqliteStorage::open(&db_path)?)
}

fn build_executor(config: &Config) -> anyhow::Result<Arc<Executor>> {
    let executor = Executor::new(
        Arc::new(build_registry(config)),
        open_storage(config)?,
        provider_from_config(&config.credentials),
    )
    .with_limits(&config.engine);
    Ok(Arc::new(executor))
}

fn parse_json_arg(raw: Option<&str>) -> anyhow::Result<Value> {
    match raw {
        Some(s) => Ok(serde_json::from_str(s)?),
        None => Ok(serde_json::json!({})),
    }
}

fn print_run(run: &Run) {
    println!("Run ID: {}", run.id);
    println!("Workflow: {}", run.workflow_name);
    println!("Status: {}", run.status);
    if let Some(parent) = &run.parent_run_id {
        println!("Retry of: {} (attempt {})", parent, run.retry_count);
    }
    if let Some(until) = run.waiting_until {
        println!("Waiting until: {}", until.to_rfc3339());
    }
    if let Some(error) = &run.error {
        println!("Error: {}", error);
    }
    if let Some(ms) = run.duration_ms {
        println!("Duration: {}ms", ms);
    }
    if let Some(output) = &run.output {
        println!();
        println!(
            "{}",
            serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string())
        );
    }
}

async fn cmd_run(
    config: &Config,
    file: &std::path::Path,
    input: Option<&str>,
    mode: RunMode,
) -> anyhow::Result<()> {
    let executor = build_executor(config)?;
    let workflow = parse_workflow_file(file)?;
    validate_workflow_with_registry(&workflow, executor.registry())?;
    let input = parse_json_arg(input)?;

    println!("Running workflow '{}'...", workflow.name);
    let run = executor.prepare_run(&workflow, input, mode).await?;
    let timeout = executor.cancellations().cancel_after(
        &run.id,
        Duration::from_secs(config.engine.run_timeout_seconds),
    );
    let run = executor.execute_run(run, &workflow).await;
    timeout.abort();

    println!();
    print_run(&run?);
    Ok(())
}

async fn cmd_resume(config: &Config, run_id: &str, data: Option<&str>) -> anyhow::Result<()> {
    let executor = build_executor(config)?;
    let data = match data {
        Some(_) => parse_json_arg(data)?,
        None => Value::Null,
    };
    let run = executor.resume_run(run_id, data).await?;
    print_run(&run);
    Ok(())
}

async fn cmd_retry(config: &Config, run_id: &str) -> anyhow::Result<()> {
    let executor = build_executor(config)?;
    let run = executor.retry_run(run_id).await?;
    print_run(&run);
    Ok(())
}

async fn cmd_show(config: &Config, run_id: &str) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let trace = storage
        .get_run_trace(run_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Run not found: {}", run_id))?;

    print_run(&trace.run);
    println!();
    for node in &trace.nodes {
        println!(
            "- {} ({}) [{}] {}ms",
            node.node_id,
            node.node_type,
            node.status,
            node.duration_ms.unwrap_or(0)
        );
        if let Some(error) = &node.error {
            println!("  error: {}", error);
        }
    }
    if let Some(state) = &trace.suspended {
        println!();
        println!("Suspended at '{}' ({})", state.node_id, state.wait_kind);
        if let Some(condition) = &state.condition {
            println!("  condition: {}", condition);
        }
    }
    Ok(())
}

async fn cmd_runs(config: &Config, workflow: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let runs = storage.list_runs(workflow, limit).await?;
    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    println!(
        "{:<36} {:<20} {:<8} {:<9} {:<20}",
        "RUN ID", "WORKFLOW", "STATUS", "MODE", "CREATED"
    );
    println!("{}", "-".repeat(96));
    for run in runs {
        println!(
            "{:<36} {:<20} {:<8} {:<9} {:<20}",
            run.id,
            run.workflow_name,
            run.status.to_string(),
            run.mode.to_string(),
            run.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn cmd_validate(config: &Config, file: &std::path::Path) -> anyhow::Result<()> {
    let workflow = parse_workflow_file(file)?;
    validate_workflow_with_registry(&workflow, &build_registry(config))?;
    println!("✓ Workflow '{}' is valid", workflow.name);
    println!("  Nodes: {}", workflow.nodes.len());
    println!("  Connections: {}", workflow.connections.len());
    Ok(())
}

fn cmd_nodes(config: &Config, grouped: bool) {
    let registry = build_registry(config);
    if grouped {
        for (group, definitions) in registry.definitions_by_group() {
            println!("{}:", group);
            for def in definitions {
                println!("  {:<18} {}", def.node_type, def.description);
            }
        }
    } else {
        for def in registry.definitions() {
            println!("{:<18} {}", def.node_type, def.description);
        }
    }
}

async fn cmd_poll(config: &Config, once: bool) -> anyhow::Result<()> {
    let executor = build_executor(config)?;
    let poller = WaitPoller::new(executor).with_poll_interval(config.poller.interval_ms);

    if once {
        let resumed = poller.process_due(chrono::Utc::now()).await?;
        println!("Resumed {} waiting run(s)", resumed);
        return Ok(());
    }

    let shutdown = ShutdownCoordinator::new();
    shutdown.start_signal_listener();
    poller.run(shutdown).await;
    Ok(())
}

async fn cmd_cleanup(config: &Config, days: Option<u32>) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let days = days.unwrap_or(config.engine.retention_days);
    let report = storage.cleanup_runs(days, chrono::Utc::now()).await?;
    println!(
        "Deleted {} run(s) and {} failed run(s) older than the retention window",
        report.runs_deleted, report.failed_runs_deleted
    );
    Ok(())
}
