//! The `ralph` command line.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::RalphConfig;
use crate::engine::{EngineEvent, EngineEventKind, RalphEngine, RalphRunResult, RunOptions};
use crate::logging::{init_logging, Verbosity};
use crate::notify::default_notifier;
use crate::provider::{build_provider, ProviderKind};
use crate::recorder::{Run, RunStore};
use crate::task::{
    CommentKind, JsonTaskStore, RuntimePatch, RuntimeStatus, Task, TaskStatus, TaskStore,
};

const COLUMNS: [TaskStatus; 5] = [
    TaskStatus::Backlog,
    TaskStatus::Todo,
    TaskStatus::Doing,
    TaskStatus::Review,
    TaskStatus::Done,
];

#[derive(Debug, Parser)]
#[command(
    name = "ralph",
    version,
    about = "Work through a Kanban board's todo column with a coding agent."
)]
pub struct Cli {
    /// Config file (TOML). Defaults to `ralph.toml` when present.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Board file, overriding `board_path`.
    #[arg(long, global = true, value_name = "PATH")]
    pub board: Option<PathBuf>,

    /// Agent CLI to drive, overriding `provider`.
    #[arg(long, global = true, value_enum)]
    pub provider: Option<ProviderKind>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every ready todo task through the agent.
    Run(RunArgs),
    /// Show the board.
    Status(StatusArgs),
    /// List the recorded runs of a task.
    Runs(RunsArgs),
    /// Check that the configured agent CLI is installed and responding.
    Check,
    /// Clear a task's attempt counter and put it back in todo.
    Reset(ResetArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Stop after this many executions.
    #[arg(long)]
    pub max_tasks: Option<usize>,

    /// Executions allowed per task before it is blocked.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Show desktop notifications (needs the `desktop-notifications` feature).
    #[arg(long)]
    pub desktop_notify: bool,

    /// Do not echo agent output.
    #[arg(long)]
    pub no_stream: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RunsArgs {
    pub task_id: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ResetArgs {
    pub task_id: String,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    init_logging(Verbosity::from_flags(cli.verbose, cli.quiet));

    let mut config = RalphConfig::load(cli.config.as_deref())?;
    if let Some(board) = cli.board {
        config.board_path = board;
    }
    if let Some(provider) = cli.provider {
        config.provider = provider;
    }

    match cli.command {
        Command::Run(args) => run_board(&config, args).await,
        Command::Status(args) => show_status(&config, args).await,
        Command::Runs(args) => show_runs(&config, args),
        Command::Check => check_provider(&config).await,
        Command::Reset(args) => reset_task(&config, args).await,
    }
}

fn open_board(config: &RalphConfig) -> Result<JsonTaskStore> {
    JsonTaskStore::open(&config.board_path)
        .with_context(|| format!("failed to open board {}", config.board_path.display()))
}

fn open_runs(config: &RalphConfig) -> Result<RunStore> {
    RunStore::new(&config.runs_dir)
        .with_context(|| format!("failed to open runs dir {}", config.runs_dir.display()))
}

async fn run_board(config: &RalphConfig, args: RunArgs) -> Result<ExitCode> {
    let store = Arc::new(open_board(config)?);
    let run_store = open_runs(config)?;
    let provider = build_provider(config.provider, &config.provider_settings());

    let engine = Arc::new(
        RalphEngine::new(store, run_store.clone(), config.engine_settings())
            .with_provider(provider)
            .with_notifier(default_notifier(args.desktop_notify)),
    );

    let subscription = engine.subscribe()?;
    let listener_id = subscription.id;
    let printer = tokio::spawn(print_events(subscription.events, !args.no_stream));

    let interrupt = {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", "Interrupted, stopping the current task...".yellow());
                engine.stop();
            }
        })
    };

    let result = engine
        .run_all_pending(RunOptions {
            max_tasks: args.max_tasks.or(config.max_tasks),
            max_attempts: args.max_attempts,
        })
        .await;

    interrupt.abort();
    engine.unsubscribe(listener_id);
    let _ = printer.await;

    let result = result?;

    match run_store.enforce_retention(config.retention_days) {
        Ok(0) => {}
        Ok(pruned) => tracing::info!(pruned, "pruned expired runs"),
        Err(err) => warn!(error = %err, "failed to prune runs"),
    }

    print_summary(&result);
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn print_events(mut events: mpsc::Receiver<EngineEvent>, stream_output: bool) {
    while let Some(event) = events.recv().await {
        let task_id = event.task_id.as_deref().unwrap_or("-");
        let field = |key: &str| {
            event
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .and_then(|value| value.as_str())
                .map(str::to_string)
                .unwrap_or_default()
        };

        match event.kind {
            EngineEventKind::TaskStart => {
                println!("\n{} {} {}", "▶".cyan(), task_id.bold(), field("title"));
            }
            EngineEventKind::TaskOutput if stream_output => {
                print!("{}", field("chunk"));
                let _ = std::io::stdout().flush();
            }
            EngineEventKind::TaskComplete => {
                println!("\n{} {} ready for review", "✓".green(), task_id.bold());
            }
            EngineEventKind::TaskFailed => {
                println!("\n{} {} failed: {}", "✗".red(), task_id.bold(), field("error"));
            }
            EngineEventKind::TaskBlocked => {
                println!("{} {} blocked ({})", "■".yellow(), task_id.bold(), field("reason"));
            }
            EngineEventKind::Stop => println!("{}", "Stopped.".yellow()),
            _ => {}
        }
    }
}

fn print_summary(result: &RalphRunResult) {
    let headline = if result.success {
        "Done".green().bold().to_string()
    } else {
        "Finished with problems".yellow().bold().to_string()
    };
    println!(
        "\n{headline}: {} processed, {} completed, {} failed, {} blocked",
        result.processed, result.completed, result.failed, result.blocked
    );
    if let Some(reason) = &result.stopped_reason {
        println!("Stopped: {reason}");
    }
}

async fn show_status(config: &RalphConfig, args: StatusArgs) -> Result<ExitCode> {
    let board = open_board(config)?.snapshot().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&board)?);
        return Ok(ExitCode::SUCCESS);
    }

    if board.tasks.is_empty() {
        println!("No tasks on board {}", config.board_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    if board.state.ralph_running {
        let current = board.state.current_task_id.as_deref().unwrap_or("-");
        let paused = if board.state.ralph_paused { " (paused)" } else { "" };
        println!("{} on {current}{paused}\n", "Ralph running".cyan());
    }

    for column in COLUMNS {
        let tasks: Vec<&Task> = board.tasks.iter().filter(|t| t.status == column).collect();
        if tasks.is_empty() {
            continue;
        }
        println!("{} ({})", column.as_str().to_uppercase().bold(), tasks.len());
        for task in tasks {
            println!("  {}", describe_task(task));
        }
        println!();
    }
    Ok(ExitCode::SUCCESS)
}

fn describe_task(task: &Task) -> String {
    let runtime = &task.runtime;
    let status = match runtime.status {
        RuntimeStatus::Failed => runtime.status.as_str().red().to_string(),
        RuntimeStatus::Blocked => runtime.status.as_str().yellow().to_string(),
        RuntimeStatus::Running => runtime.status.as_str().cyan().to_string(),
        _ => runtime.status.as_str().dimmed().to_string(),
    };
    let mut line = format!(
        "{}  {}  [{}] {status}",
        task.id.bold(),
        task.title,
        task.priority.as_str()
    );
    if runtime.attempt_count > 0 {
        line.push_str(&format!(", {} attempt(s)", runtime.attempt_count));
    }
    if !task.depends_on.is_empty() {
        line.push_str(&format!(", after {}", task.depends_on.join(", ")));
    }
    line
}

fn show_runs(config: &RalphConfig, args: RunsArgs) -> Result<ExitCode> {
    let runs = open_runs(config)?.list_for_task(&args.task_id)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(ExitCode::SUCCESS);
    }

    if runs.is_empty() {
        println!("No runs recorded for {}", args.task_id);
        return Ok(ExitCode::SUCCESS);
    }
    for run in &runs {
        println!("{}", describe_run(run));
    }
    Ok(ExitCode::SUCCESS)
}

fn describe_run(run: &Run) -> String {
    let duration = run
        .duration()
        .map(|d| format!("{}s", d.num_seconds()))
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{}  {:<9}  {}  {duration}  {} records",
        run.id,
        run.status.as_str(),
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        run.record_count()
    );
    if !run.files_modified.is_empty() {
        line.push_str(&format!(", {} file(s) changed", run.files_modified.len()));
    }
    if let Some(error) = &run.error {
        line.push_str(&format!("\n    {}", error.lines().next().unwrap_or_default().red()));
    }
    line
}

async fn check_provider(config: &RalphConfig) -> Result<ExitCode> {
    let provider = build_provider(config.provider, &config.provider_settings());
    if provider.is_ready().await {
        println!("{} {} is ready", "✓".green(), provider.name());
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "{} {} is not ready: is the CLI installed, on PATH, and authenticated?",
            "✗".red(),
            provider.name()
        );
        Ok(ExitCode::FAILURE)
    }
}

async fn reset_task(config: &RalphConfig, args: ResetArgs) -> Result<ExitCode> {
    let store = open_board(config)?;
    let Some(task) = store.get_task(&args.task_id).await? else {
        bail!("task {} not found on {}", args.task_id, config.board_path.display());
    };
    if task.runtime.status == RuntimeStatus::Running {
        bail!("task {} is running; stop ralph first", task.id);
    }

    store
        .update_task_runtime(
            &task.id,
            RuntimePatch::status(RuntimeStatus::Idle)
                .with_current_run(None)
                .reset_attempts(),
        )
        .await?;
    if task.status != TaskStatus::Todo {
        store.move_task(&task.id, TaskStatus::Todo).await?;
    }
    store
        .add_typed_comment(
            &task.id,
            CommentKind::System,
            "ralph",
            &format!(
                "Attempt counter reset (was {}); the task is queued again.",
                task.runtime.attempt_count
            ),
            None,
        )
        .await?;

    println!("{} {} reset and moved to todo", "✓".green(), task.id.bold());
    Ok(ExitCode::SUCCESS)
}
