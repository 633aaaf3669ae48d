//! Tiered local execution.
//!
//! The `LocalPoolExecutor` runs a graph one dependency tier at a time:
//! - every unit of a tier is dispatched at once and gated by a semaphore
//!   sized to the worker count
//! - the coordinator waits for the whole tier before looking at the next
//! - a failed unit lets its siblings finish but stops the run at that tier
//!
//! Jobs and groups both run under bash, as they do on the grid. Job groups
//! expand into one unit per task. The group's control script is written once
//! to a run-scoped temporary directory and every task runs that file with
//! its 1-based index in [`TASK_ID_VAR`](crate::core::group::TASK_ID_VAR).

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::graph::{DependencyGraph, GraphError, Tier};
use crate::core::group::{JobGroup, TASK_ID_VAR};
use crate::core::job::Job;
use crate::core::node::Node;
use crate::core::types::{NodeId, RunId};
use crate::events::{Event, EventBus};

use super::ExecuteError;
use super::command::{CommandError, ShellCommand, ShellCommandBuilder};
use super::result::{JobResult, JobStatus, RunResults};

/// One concrete invocation: a job, or one task of a group.
#[derive(Debug, Clone)]
struct WorkUnit {
    node: NodeId,
    node_name: String,
    task_index: Option<usize>,
    command: ShellCommand,
}

impl WorkUnit {
    fn name(&self) -> String {
        JobResult::unit_name(&self.node_name, self.task_index)
    }
}

/// Executor running graph tiers on a bounded pool of local workers.
pub struct LocalPoolExecutor {
    workers: usize,
    semaphore: Arc<Semaphore>,
    event_bus: Option<Arc<EventBus>>,
    working_dir: Option<PathBuf>,
}

impl LocalPoolExecutor {
    /// Create an executor running at most `workers` commands at once.
    ///
    /// A worker count of zero is treated as one.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            semaphore: Arc::new(Semaphore::new(workers)),
            event_bus: None,
            working_dir: None,
        }
    }

    /// Emit lifecycle events to `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Run every command from `dir`.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Idle worker slots.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run the graph to completion, or until a tier fails.
    pub async fn run(&self, graph: &mut DependencyGraph) -> Result<RunResults, ExecuteError> {
        self.run_until_cancelled(graph, &CancellationToken::new())
            .await
    }

    /// Run the graph, checking `cancel` before each tier.
    ///
    /// Cancellation never interrupts a running tier; it only stops later
    /// tiers from being dispatched. Units that never ran are reported as
    /// [`JobStatus::Skipped`].
    ///
    /// Fails before running anything if the graph has a cycle or any node
    /// was already submitted.
    pub async fn run_until_cancelled(
        &self,
        graph: &mut DependencyGraph,
        cancel: &CancellationToken,
    ) -> Result<RunResults, ExecuteError> {
        let tiers = graph.tiers()?;
        if let Some((_, node)) = graph.nodes().find(|(_, node)| node.is_submitted()) {
            return Err(GraphError::AlreadySubmitted(node.name().to_string()).into());
        }

        let script_dir = tempfile::Builder::new()
            .prefix("jobgraph-")
            .tempdir()
            .map_err(|source| ExecuteError::ScriptWrite {
                path: std::env::temp_dir(),
                source,
            })?;

        let run_id = RunId::new();
        let span = info_span!(
            "local_run",
            run = %run_id.short(),
            nodes = graph.len(),
            tiers = tiers.len(),
            workers = self.workers,
        );

        // The directory is removed once every tier has finished.
        self.run_tiers(graph, &tiers, run_id, &script_dir, cancel)
            .instrument(span)
            .await
    }

    async fn run_tiers(
        &self,
        graph: &mut DependencyGraph,
        tiers: &[Tier],
        run_id: RunId,
        script_dir: &TempDir,
        cancel: &CancellationToken,
    ) -> Result<RunResults, ExecuteError> {
        let start = Instant::now();
        let mut results = RunResults::new(run_id.clone());

        for tier in tiers {
            if results.halted_at_tier.is_none() && !results.cancelled && cancel.is_cancelled() {
                info!(tier = tier.index(), "run cancelled before tier");
                results.cancelled = true;
            }
            if results.halted_at_tier.is_some() || results.cancelled {
                skip_tier(graph, tier, &mut results)?;
                continue;
            }

            let mut units = Vec::new();
            for &id in tier.nodes() {
                match graph.get(id)? {
                    Node::Job(job) => units.push(self.job_unit(id, job)),
                    Node::Group(group) => {
                        let script = write_group_script(script_dir.path(), id, group).await?;
                        units.extend(self.group_units(id, group, script));
                    }
                }
                graph.mark_submitted(id)?;
            }

            debug!(tier = tier.index(), units = units.len(), "dispatching tier");
            if let Some(ref bus) = self.event_bus {
                bus.emit(Event::tier_started(run_id.clone(), tier.index(), units.len()))
                    .await;
            }

            let tier_results = self
                .run_tier(run_id.clone(), units)
                .instrument(info_span!("tier", index = tier.index()))
                .await;

            let failed: Vec<String> = tier_results
                .iter()
                .filter(|r| r.status == JobStatus::Failed)
                .map(|r| r.name.clone())
                .collect();
            for result in tier_results {
                results.insert(result);
            }

            if !failed.is_empty() {
                warn!(
                    tier = tier.index(),
                    failed = %failed.join(", "),
                    "tier failed, not advancing"
                );
                results.halted_at_tier = Some(tier.index());
            }
        }

        results.duration = start.elapsed();
        info!(
            success = results.success(),
            succeeded = results.count(JobStatus::Succeeded),
            failed = results.count(JobStatus::Failed),
            skipped = results.count(JobStatus::Skipped),
            duration_ms = %results.duration.as_millis(),
            "local run finished"
        );
        if let Some(ref bus) = self.event_bus {
            bus.emit(Event::run_completed(run_id, results.success(), results.duration))
                .await;
        }
        Ok(results)
    }

    /// Dispatch every unit and wait for all of them.
    async fn run_tier(&self, run_id: RunId, units: Vec<WorkUnit>) -> Vec<JobResult> {
        let expected: Vec<(NodeId, String, Option<usize>)> = units
            .iter()
            .map(|unit| (unit.node, unit.node_name.clone(), unit.task_index))
            .collect();
        let mut set = JoinSet::new();

        for unit in units {
            let semaphore = Arc::clone(&self.semaphore);
            let event_bus = self.event_bus.clone();
            let run_id = run_id.clone();
            let span = info_span!("job", name = %unit.name());
            set.spawn(run_unit(unit, semaphore, event_bus, run_id).instrument(span));
        }

        let mut results = Vec::with_capacity(expected.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => warn!(error = %err, "worker task failed"),
            }
        }

        // A unit whose task panicked still gets a record.
        for (node, node_name, task_index) in expected {
            let name = JobResult::unit_name(&node_name, task_index);
            if !results.iter().any(|r| r.name == name) {
                let mut result = JobResult::empty(node, &node_name, task_index, JobStatus::Failed);
                result.error = Some("worker task failed".to_string());
                results.push(result);
            }
        }
        results
    }

    fn job_unit(&self, id: NodeId, job: &Job) -> WorkUnit {
        WorkUnit {
            node: id,
            node_name: job.name().to_string(),
            task_index: None,
            command: self.in_working_dir(ShellCommand::builder(job.command())).build(),
        }
    }

    /// One unit per task, all running the same script file.
    fn group_units(&self, id: NodeId, group: &JobGroup, script: Arc<Path>) -> Vec<WorkUnit> {
        (0..group.tasks())
            .map(|index| {
                let builder = ShellCommand::from_file(Arc::clone(&script))
                    .env(TASK_ID_VAR, (index + 1).to_string());
                WorkUnit {
                    node: id,
                    node_name: group.name().to_string(),
                    task_index: Some(index),
                    command: self.in_working_dir(builder).build(),
                }
            })
            .collect()
    }

    fn in_working_dir(&self, builder: ShellCommandBuilder) -> ShellCommandBuilder {
        match self.working_dir {
            Some(ref dir) => builder.working_dir(dir),
            None => builder,
        }
    }
}

impl Default for LocalPoolExecutor {
    fn default() -> Self {
        Self::new(4)
    }
}

fn skip_tier(
    graph: &DependencyGraph,
    tier: &Tier,
    results: &mut RunResults,
) -> Result<(), GraphError> {
    for &id in tier.nodes() {
        let node = graph.get(id)?;
        if node.is_group() {
            for index in 0..node.tasks() {
                results.insert(JobResult::skipped(id, node.name(), Some(index)));
            }
        } else {
            results.insert(JobResult::skipped(id, node.name(), None));
        }
    }
    Ok(())
}

/// Write a group's control script, named by node index so any group name
/// is a safe file name.
async fn write_group_script(
    dir: &Path,
    id: NodeId,
    group: &JobGroup,
) -> Result<Arc<Path>, ExecuteError> {
    let path = dir.join(format!("{}.sh", id.index()));
    tokio::fs::write(&path, group.generate_script())
        .await
        .map_err(|source| ExecuteError::ScriptWrite {
            path: path.clone(),
            source,
        })?;
    debug!(group = group.name(), path = %path.display(), "wrote control script");
    Ok(Arc::from(path))
}

/// Run one unit once a worker slot is free.
async fn run_unit(
    unit: WorkUnit,
    semaphore: Arc<Semaphore>,
    event_bus: Option<Arc<EventBus>>,
    run_id: RunId,
) -> JobResult {
    let name = unit.name();
    let mut result = JobResult::empty(unit.node, &unit.node_name, unit.task_index, JobStatus::Running);

    let Ok(permit) = semaphore.acquire_owned().await else {
        result.status = JobStatus::Failed;
        result.error = Some("worker pool closed".to_string());
        return result;
    };

    if let Some(ref bus) = event_bus {
        bus.emit(Event::job_started(run_id.clone(), &name)).await;
    }
    debug!("job started");

    result.started_at = Some(Utc::now());
    let start = Instant::now();
    let outcome = unit.command.run().await;
    result.duration = start.elapsed();
    result.finished_at = Some(Utc::now());
    drop(permit);

    match outcome {
        Ok(output) => {
            result.status = JobStatus::Succeeded;
            result.exit_code = Some(output.exit_code);
            result.stdout = Some(output.stdout);
            result.stderr = Some(output.stderr);
            debug!(duration_ms = %result.duration.as_millis(), "job succeeded");
        }
        Err(err) => {
            result.status = JobStatus::Failed;
            result.exit_code = err.exit_code();
            result.error = Some(err.to_string());
            if let CommandError::Failed { stdout, stderr, .. } = err {
                result.stdout = Some(stdout);
                result.stderr = Some(stderr);
            }
            warn!(
                exit_code = ?result.exit_code,
                error = result.error.as_deref().unwrap_or_default(),
                "job failed"
            );
        }
    }

    if let Some(ref bus) = event_bus {
        bus.emit(Event::job_finished(run_id, &result)).await;
    }
    result
}
