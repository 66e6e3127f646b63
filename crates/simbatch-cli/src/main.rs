//! # simbatch-cli
//!
//! Binary entry point for Simbatch.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - `simbatch run`: launch a batch described by a YAML file
//! - `simbatch watch`: attach a progress monitor to running tasks
//! - `simbatch combine`: re-run output aggregation from a manifest
//! - `simbatch inspect`: print a manifest summary

mod batch_config;
mod demo;

use anyhow::{Context, Result};
use batch_config::BatchConfig;
use clap::{Parser, Subcommand, ValueEnum};
use demo::RandomWalkEngine;
use indicatif::{ProgressBar, ProgressStyle};
use simbatch_core::{
    BatchReport, PoolCoordinator, PooledOptions, ProgressMonitor, SequentialOptions, TaskManifest,
    combine_session_outputs, launch_batch_sessions, launch_batch_tasks,
};
use simbatch_proto::EngineAdapter;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Simbatch - batch launcher for market simulation sessions
#[derive(Parser, Debug)]
#[command(name = "simbatch", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch a batch of simulation tasks
    Run(RunArgs),

    /// Monitor progress of running tasks by tailing their output files
    Watch(WatchArgs),

    /// Combine a task's per-session output files into one file
    Combine(CombineArgs),

    /// Print a task manifest summary
    Inspect(InspectArgs),
}

/// Execution strategy for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum RunMode {
    /// One task at a time, sessions in index order; seed-reproducible
    #[default]
    Sequential,
    /// Whole tasks in parallel, sessions sequential within each task;
    /// seed-reproducible per task
    Tasks,
    /// Every session of every task in parallel; not reproducible
    Sessions,
}

/// Arguments for the run subcommand.
#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the batch configuration file
    #[arg(short, long, default_value = "simbatch.yml")]
    config: PathBuf,

    /// Execution strategy
    #[arg(long, value_enum, default_value_t = RunMode::Sequential)]
    mode: RunMode,

    /// Override sessions per task
    #[arg(long)]
    sessions: Option<usize>,

    /// Override the reproducibility seed (sequential and tasks modes only)
    #[arg(long)]
    seed: Option<u64>,

    /// Worker pool size (default: min(pending units, cores - 1))
    #[arg(long)]
    workers: Option<usize>,

    /// Keep per-session output files separate
    #[arg(long)]
    no_merge: bool,
}

/// Arguments for the watch subcommand.
#[derive(Parser, Debug)]
struct WatchArgs {
    /// Directory holding the task manifests
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Task ids to watch (repeatable)
    #[arg(short, long = "task", required = true)]
    tasks: Vec<String>,

    /// Polling interval in seconds
    #[arg(long, default_value_t = 1.0)]
    interval: f64,

    /// Block until the manifests appear instead of failing
    #[arg(long)]
    wait: bool,
}

/// Arguments for the combine subcommand.
#[derive(Parser, Debug)]
struct CombineArgs {
    /// Path to the task manifest
    manifest: PathBuf,
}

/// Arguments for the inspect subcommand.
#[derive(Parser, Debug)]
struct InspectArgs {
    /// Path to the task manifest
    manifest: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Watch(args) => watch_command(args).await,
        Commands::Combine(args) => combine_command(&args),
        Commands::Inspect(args) => inspect_command(&args),
    }
}

async fn run_command(args: RunArgs) -> Result<()> {
    let mut config = BatchConfig::from_file(&args.config)
        .with_context(|| format!("failed to load batch config from {:?}", args.config))?;

    if let Some(sessions) = args.sessions {
        config.sessions = sessions;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if args.no_merge {
        config.merge = false;
    }
    config.validate().context("invalid batch configuration")?;

    if args.seed.is_some() && args.mode == RunMode::Sessions {
        warn!("session-granularity parallelism is not reproducible; ignoring --seed");
    }

    let engine = Arc::new(EngineAdapter::new(Arc::new(RandomWalkEngine))?);
    let tasks = config.build_tasks();
    info!(
        engine = engine.name(),
        tasks = tasks.len(),
        sessions = config.sessions,
        mode = ?args.mode,
        "starting batch"
    );

    match args.mode {
        RunMode::Sequential => {
            let opts = SequentialOptions {
                sessions: config.sessions,
                seed: config.seed,
                merge: config.merge,
            };
            let engine = Arc::clone(&engine);
            tokio::task::spawn_blocking(move || -> Result<()> {
                for task in &tasks {
                    task.launch(&engine, &opts)
                        .with_context(|| format!("task '{}' failed", task.task_id))?;
                }
                Ok(())
            })
            .await??;
            info!("batch complete");
            Ok(())
        }
        RunMode::Tasks => {
            let opts = SequentialOptions {
                sessions: config.sessions,
                seed: config.seed,
                merge: config.merge,
            };
            let mut pool = new_pool(args.workers, tasks.len());
            let report = launch_batch_tasks(&engine, &tasks, &opts, &mut pool).await?;
            report_outcome(&report)
        }
        RunMode::Sessions => {
            let opts = PooledOptions {
                sessions: config.sessions,
                merge: config.merge,
            };
            let mut pool = new_pool(args.workers, tasks.len() * config.sessions);
            let report = launch_batch_sessions(&engine, &tasks, &opts, &mut pool).await?;
            report_outcome(&report)
        }
    }
}

/// Builds the shared pool and wires Ctrl-C to its cancellation flag.
fn new_pool(workers: Option<usize>, pending_units: usize) -> PoolCoordinator {
    let pool = PoolCoordinator::new(
        workers.unwrap_or_else(|| PoolCoordinator::default_workers(pending_units)),
    );
    let flag = pool.cancellation_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; letting running sessions finish");
            flag.store(true, Ordering::SeqCst);
        }
    });
    pool
}

fn report_outcome(report: &BatchReport) -> Result<()> {
    for failure in &report.failures {
        warn!(
            task_id = %failure.task_id,
            session_id = failure.session_id.as_deref().unwrap_or("-"),
            error = %failure.error,
            "unit of work failed"
        );
    }
    if report.cancelled {
        info!("batch cancelled; pool shut down cleanly");
        return Ok(());
    }
    if report.failures.is_empty() {
        info!("batch complete");
        Ok(())
    } else {
        anyhow::bail!("{} unit(s) of work failed", report.failures.len())
    }
}

async fn watch_command(args: WatchArgs) -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let interval = Duration::from_secs_f64(args.interval);
    let snapshot = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut monitor =
            ProgressMonitor::attach(&args.output_dir, &args.tasks, interval, args.wait, &cancel)
                .context("failed to attach progress monitor")?;

        let bar = ProgressBar::new(monitor.expected());
        bar.set_style(
            ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} units ({percent}%) {msg}",
            )?
            .progress_chars("=> "),
        );
        let snapshot = monitor.watch(&cancel, |s| bar.set_position(s.completed));
        if snapshot.is_complete() {
            bar.finish_with_message("done");
        } else {
            bar.abandon_with_message("stopped");
        }
        Ok(snapshot)
    })
    .await??;

    info!(
        completed = snapshot.completed,
        expected = snapshot.expected,
        "watch finished"
    );
    Ok(())
}

fn combine_command(args: &CombineArgs) -> Result<()> {
    let manifest = TaskManifest::load(&args.manifest)
        .with_context(|| format!("failed to load manifest {:?}", args.manifest))?;
    let dest = combine_session_outputs(&manifest)?;
    println!("{}", dest.display());
    Ok(())
}

fn inspect_command(args: &InspectArgs) -> Result<()> {
    let manifest = TaskManifest::load(&args.manifest)
        .with_context(|| format!("failed to load manifest {:?}", args.manifest))?;

    println!("Task:       {}", manifest.task_id);
    println!("Version:    {}", manifest.version);
    println!("Sessions:   {}", manifest.session_num);
    match manifest.seed {
        Some(seed) => println!("Seed:       {seed}"),
        None => println!("Seed:       (none - not reproducible)"),
    }
    if let Some(created) = manifest.created_at {
        println!("Created:    {created}");
    }
    println!("Output dir: {}", manifest.output_dir.display());
    if let Some(expected) = manifest.expected_units() {
        println!("Expected:   {expected} progress units");
    }
    println!("Outputs:");
    for path in &manifest.dump_avg_balance {
        println!("  {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::parse_from([
            "simbatch", "run", "--config", "b.yml", "--mode", "sessions", "--sessions", "20",
            "--workers", "4", "--no-merge",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("b.yml"));
                assert_eq!(args.mode, RunMode::Sessions);
                assert_eq!(args.sessions, Some(20));
                assert_eq!(args.workers, Some(4));
                assert!(args.no_merge);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_watch_tasks() {
        let cli = Cli::parse_from([
            "simbatch", "watch", "-o", "out", "-t", "A", "-t", "B", "--interval", "0.5", "--wait",
        ]);
        match cli.command {
            Commands::Watch(args) => {
                assert_eq!(args.tasks, vec!["A", "B"]);
                assert!(args.wait);
                assert!((args.interval - 0.5).abs() < f64::EPSILON);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_watch_requires_a_task() {
        assert!(Cli::try_parse_from(["simbatch", "watch", "-o", "out"]).is_err());
    }
}
