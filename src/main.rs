//! jg - run a job file locally or on a grid scheduler.
//!
//! Usage:
//!   jg run <job-file>               Run every job, tier by tier or on the grid
//!   jg validate <job-file>          Check a job file without running it
//!   jg list <job-file>              Print the dependency tiers
//!   jg script <job-file> <group>    Print a group's control script

use clap::{Parser, Subcommand, ValueEnum};
use jobgraph::config::SchedulerKind;
use jobgraph::{
    DependencyGraph, Event, EventBus, EventHandler, JobStatus, RunConfig, YamlLoader,
    execute_with_events, load_job_file,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// jg - dependency-ordered shell jobs
#[derive(Parser)]
#[command(name = "jg")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every job in a job file
    Run {
        /// Path to the job file
        #[arg(value_name = "JOB_FILE")]
        job_file: PathBuf,

        /// Run settings file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Where to run the jobs
        #[arg(short, long, value_enum)]
        scheduler: Option<SchedulerArg>,

        /// Local worker count (default: available parallelism)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Prefix for grid job names
        #[arg(short, long)]
        prefix: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a job file without running it
    Validate {
        #[arg(value_name = "JOB_FILE")]
        job_file: PathBuf,
    },

    /// List the dependency tiers of a job file
    List {
        #[arg(value_name = "JOB_FILE")]
        job_file: PathBuf,
    },

    /// Print the generated control script of a group
    Script {
        #[arg(value_name = "JOB_FILE")]
        job_file: PathBuf,

        #[arg(value_name = "GROUP")]
        group: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchedulerArg {
    Local,
    Grid,
}

impl From<SchedulerArg> for SchedulerKind {
    fn from(arg: SchedulerArg) -> Self {
        match arg {
            SchedulerArg::Local => SchedulerKind::Local,
            SchedulerArg::Grid => SchedulerKind::Grid,
        }
    }
}

/// Prints progress and captured output as events arrive.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::TierStarted { tier, units, .. } => {
                info!("Tier {} started ({} unit(s))", tier, units);
            }
            Event::JobStarted { name, .. } => {
                info!("  Job '{}' started", name);
            }
            Event::JobFinished {
                name,
                status,
                duration,
                stdout,
                stderr,
                exit_code,
                error,
                ..
            } => {
                let exit_info = exit_code
                    .map(|c| format!(" (exit: {})", c))
                    .unwrap_or_default();
                if *status == JobStatus::Succeeded {
                    info!("  Job '{}' succeeded in {:?}{}", name, duration, exit_info);
                } else {
                    warn!(
                        "  Job '{}' failed after {:?}{}: {}",
                        name,
                        duration,
                        exit_info,
                        error.as_deref().unwrap_or("unknown error")
                    );
                }
                if let Some(out) = stdout {
                    for line in out.trim().lines() {
                        info!("    stdout: {}", line);
                    }
                }
                if let Some(err) = stderr {
                    for line in err.trim().lines() {
                        warn!("    stderr: {}", line);
                    }
                }
            }
            Event::JobSubmitted {
                name, holds, tasks, ..
            } => {
                if holds.is_empty() {
                    info!("Submitted '{}' ({} task(s))", name, tasks);
                } else {
                    info!(
                        "Submitted '{}' ({} task(s), holds: {})",
                        name,
                        tasks,
                        holds.join(", ")
                    );
                }
            }
            Event::JobDequeued { name, waited, .. } => {
                info!("  '{}' left the queue after {:?}", name, waited);
            }
            Event::RunCompleted {
                run_id,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!("Run {} completed in {:?}", run_id.short(), duration);
                } else {
                    error!("Run {} did not complete after {:?}", run_id.short(), duration);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            job_file,
            config,
            scheduler,
            workers,
            prefix,
            json,
        } => {
            let mut run_config = match config {
                Some(path) => YamlLoader::load_run_config(path)?,
                None => RunConfig::default(),
            };
            if let Some(scheduler) = scheduler {
                run_config.scheduler = scheduler.into();
            }
            if workers.is_some() {
                run_config.workers = workers;
            }
            if prefix.is_some() {
                run_config.grid.prefix = prefix;
            }
            run_jobs(&job_file, &run_config, json).await?;
        }
        Commands::Validate { job_file } => {
            validate_jobs(&job_file)?;
        }
        Commands::List { job_file } => {
            list_jobs(&job_file)?;
        }
        Commands::Script { job_file, group } => {
            print_script(&job_file, &group)?;
        }
    }

    Ok(())
}

/// Run every job in a job file.
async fn run_jobs(
    job_file: &Path,
    run_config: &RunConfig,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading jobs from: {}", job_file.display());
    let mut graph = load_job_file(job_file)?;
    if graph.is_empty() {
        warn!("No jobs found in {}", job_file.display());
        return Ok(());
    }

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing current work...");
            ctrl_c.cancel();
        }
    });

    let mode = run_config.mode();
    info!("Running {} node(s) with {:?}", graph.len(), mode);
    let results = execute_with_events(&mut graph, &mode, &cancel, event_bus).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!();
        println!(
            "succeeded: {}  failed: {}  skipped: {}  dequeued: {}",
            results.count(JobStatus::Succeeded),
            results.count(JobStatus::Failed),
            results.count(JobStatus::Skipped),
            results.count(JobStatus::Dequeued),
        );
        if let Some(tier) = results.halted_at_tier {
            println!("halted after tier {}", tier);
        }
        if results.count(JobStatus::Dequeued) > 0 {
            println!("grid jobs left the queue; check their output for exit status");
        }
    }

    if results.cancelled {
        return Err("run cancelled".into());
    }
    if !results.success() {
        return Err(format!("failed jobs: {}", results.failed().join(", ")).into());
    }
    Ok(())
}

/// Validate a job file without running it.
fn validate_jobs(job_file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating: {}", job_file.display());

    match load_job_file(job_file) {
        Ok(graph) => {
            let tiers = graph.tiers()?;
            info!(
                "{} node(s) in {} tier(s): OK",
                graph.len(),
                tiers.len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Print the tiers of a job file.
fn list_jobs(job_file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let graph = load_job_file(job_file)?;
    if graph.is_empty() {
        println!("No jobs found in {}", job_file.display());
        return Ok(());
    }

    println!("Jobs in {}:", job_file.display());
    for tier in graph.tiers()? {
        println!();
        println!("Tier {}:", tier.index());
        for &id in tier.nodes() {
            print_node(&graph, id)?;
        }
    }
    Ok(())
}

fn print_node(graph: &DependencyGraph, id: jobgraph::NodeId) -> Result<(), Box<dyn std::error::Error>> {
    let node = graph.get(id)?;
    let mut line = format!("  - {}", node.name());
    if node.is_group() {
        line.push_str(&format!(" [{} task(s)]", node.tasks()));
    }
    if let Some(queue) = node.queue() {
        line.push_str(&format!(" (queue: {})", queue));
    }

    let deps = graph
        .dependencies(id)
        .iter()
        .map(|&dep| graph.get(dep).map(|d| d.name().to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    if !deps.is_empty() {
        line.push_str(&format!(" (depends on: {})", deps.join(", ")));
    }
    println!("{}", line);
    Ok(())
}

/// Print the control script of a group.
fn print_script(job_file: &Path, group: &str) -> Result<(), Box<dyn std::error::Error>> {
    let graph = load_job_file(job_file)?;
    let id = graph
        .find(group)
        .ok_or_else(|| format!("no node named '{}'", group))?;
    let node = graph.get(id)?;
    if !node.is_group() {
        return Err(format!("'{}' is a job, not a group", group).into());
    }
    print!("{}", node.script());
    Ok(())
}
