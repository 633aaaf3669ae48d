//! Submission to an external grid scheduler.
//!
//! The `GridExecutor` hands every node of a graph to a [`GridScheduler`] in
//! dependency order. Edges become native hold lists, so ordering is
//! expressed to the scheduler rather than enforced here. Completion is then
//! observed by polling the scheduler's active set with a [`PollBackoff`].
//!
//! Polling cannot tell a job that succeeded from one that failed: both
//! simply stop being listed. Waits therefore report
//! [`JobStatus::Dequeued`], never `Succeeded` or `Failed`.
//!
//! [`SgeScheduler`] drives Sun Grid Engine through `qsub` and `qstat`.
//! Groups are submitted as array jobs and receive their 1-based task index
//! in [`TASK_ID_VAR`](crate::core::group::TASK_ID_VAR).

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::backoff::PollBackoff;
use crate::core::graph::{DependencyGraph, GraphError};
use crate::core::types::{NodeId, RunId};
use crate::events::{Event, EventBus};

use super::ExecuteError;
use super::result::{JobResult, JobStatus, RunResults};

/// Lines every submitted script starts with.
const SCRIPT_HEADER: &str = "#!/bin/sh\n#$ -S /bin/bash\n";

/// Errors from talking to a grid scheduler.
#[derive(Debug, Error)]
pub enum GridError {
    /// A scheduler program could not be started.
    #[error("failed to run '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A control script or its directory could not be written.
    #[error("failed to write '{}': {source}", .path.display())]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scheduler refused a submission.
    #[error("submission of '{name}' rejected (exit code {code:?}): {stderr}")]
    Rejected {
        name: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The scheduler could not report whether a job is active.
    #[error("status query for '{name}' failed: {reason}")]
    StatusQuery { name: String, reason: String },
}

/// One node as handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Grid job name, prefix included.
    pub name: String,
    pub script_path: PathBuf,
    /// Passed through verbatim.
    pub queue: Option<String>,
    /// Grid names of the jobs this one must wait for.
    pub holds: Vec<String>,
    /// Array size for groups; `None` for plain jobs.
    pub tasks: Option<usize>,
}

/// A batch scheduler that accepts scripts and reports which jobs are active.
#[async_trait]
pub trait GridScheduler: Send + Sync {
    /// Queue a submission. Returns once the scheduler accepted it.
    async fn submit(&self, submission: &Submission) -> Result<(), GridError>;

    /// Whether a job with this name is still queued or running.
    async fn is_active(&self, name: &str) -> Result<bool, GridError>;
}

/// Sun Grid Engine via its command-line tools.
#[derive(Debug, Clone)]
pub struct SgeScheduler {
    submit_program: String,
    status_program: String,
    output_dir: PathBuf,
}

impl SgeScheduler {
    /// Scheduler writing job stdout and stderr into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            submit_program: "qsub".to_string(),
            status_program: "qstat".to_string(),
            output_dir: output_dir.into(),
        }
    }

    /// Use other submission and status programs.
    pub fn with_programs(mut self, submit: impl Into<String>, status: impl Into<String>) -> Self {
        self.submit_program = submit.into();
        self.status_program = status.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Arguments passed to the submission program.
    pub fn qsub_args(&self, submission: &Submission) -> Vec<String> {
        let output = self.output_dir.display().to_string();
        let mut args = vec![
            "-N".to_string(),
            submission.name.clone(),
            "-cwd".to_string(),
            "-o".to_string(),
            output.clone(),
            "-e".to_string(),
            output,
        ];
        if let Some(tasks) = submission.tasks {
            args.push("-t".to_string());
            args.push(format!("1:{}", tasks));
        }
        if !submission.holds.is_empty() {
            args.push("-hold_jid".to_string());
            args.push(submission.holds.join(","));
        }
        if let Some(ref queue) = submission.queue {
            args.push("-q".to_string());
            args.push(queue.clone());
        }
        args.push(submission.script_path.display().to_string());
        args
    }
}

#[async_trait]
impl GridScheduler for SgeScheduler {
    async fn submit(&self, submission: &Submission) -> Result<(), GridError> {
        let output = Command::new(&self.submit_program)
            .args(self.qsub_args(submission))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| GridError::Io {
                program: self.submit_program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(GridError::Rejected {
                name: submission.name.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// `qstat -j NAME` exits 0 only while the job is known to the scheduler.
    async fn is_active(&self, name: &str) -> Result<bool, GridError> {
        let status = Command::new(&self.status_program)
            .args(["-j", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| GridError::Io {
                program: self.status_program.clone(),
                source,
            })?;
        Ok(status.success())
    }
}

/// Settings for grid runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Prepended to every grid job name as `{prefix}_{name}`.
    pub prefix: Option<String>,
    /// Where control scripts are written.
    pub script_dir: PathBuf,
    /// Where the scheduler writes job stdout and stderr.
    pub output_dir: PathBuf,
    pub submit_program: String,
    pub status_program: String,
    pub backoff: PollBackoff,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            script_dir: PathBuf::from("jobgraph_scripts"),
            output_dir: PathBuf::from("jobgraph_output"),
            submit_program: "qsub".to_string(),
            status_program: "qstat".to_string(),
            backoff: PollBackoff::default(),
        }
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The job left the active set. Says nothing about its exit status.
    Dequeued { polls: u32, waited: Duration },
    /// The caller abandoned the wait; the job may still be running.
    Cancelled { polls: u32 },
}

/// Executor that submits a graph to a grid scheduler.
pub struct GridExecutor<S> {
    scheduler: Arc<S>,
    config: GridConfig,
    event_bus: Option<Arc<EventBus>>,
    run_id: RunId,
}

impl GridExecutor<SgeScheduler> {
    /// Executor backed by SGE with the programs and directories in `config`.
    pub fn sge(config: GridConfig) -> Self {
        let scheduler = SgeScheduler::new(&config.output_dir)
            .with_programs(&config.submit_program, &config.status_program);
        Self::new(scheduler, config)
    }
}

impl<S: GridScheduler + 'static> GridExecutor<S> {
    pub fn new(scheduler: S, config: GridConfig) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
            config,
            event_bus: None,
            run_id: RunId::new(),
        }
    }

    /// Emit lifecycle events to `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Name under which a node is known to the scheduler.
    pub fn grid_name(&self, node_name: &str) -> String {
        match self.config.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{}_{}", prefix, node_name),
            _ => node_name.to_string(),
        }
    }

    /// Submit every node, dependencies first.
    ///
    /// Fails without submitting anything if the graph has a cycle or any
    /// node was already submitted. A scheduler error stops submission
    /// part-way; nodes submitted before it stay marked.
    pub async fn submit(&self, graph: &mut DependencyGraph) -> Result<Vec<NodeId>, ExecuteError> {
        let order = graph.topological_order()?;
        if let Some((_, node)) = graph.nodes().find(|(_, node)| node.is_submitted()) {
            return Err(GraphError::AlreadySubmitted(node.name().to_string()).into());
        }

        let span = info_span!("grid_submit", run = %self.run_id.short(), nodes = order.len());
        async {
            self.prepare_directories().await?;
            for &id in &order {
                self.submit_node(graph, id).await?;
            }
            info!("all nodes submitted");
            Ok(order)
        }
        .instrument(span)
        .await
    }

    /// Submit a single node whose dependencies are already submitted.
    pub async fn submit_node(
        &self,
        graph: &mut DependencyGraph,
        id: NodeId,
    ) -> Result<(), ExecuteError> {
        let node = graph.get(id)?;
        if node.is_submitted() {
            return Err(GraphError::AlreadySubmitted(node.name().to_string()).into());
        }

        let mut holds = Vec::with_capacity(node.dependencies().len());
        for &dep in node.dependencies() {
            let dep = graph.get(dep)?;
            if !dep.is_submitted() {
                return Err(GraphError::NotSubmitted(dep.name().to_string()).into());
            }
            holds.push(self.grid_name(dep.name()));
        }

        let name = self.grid_name(node.name());
        let script_path = self.config.script_dir.join(&name);
        write_script(&script_path, &node.script()).await?;

        let submission = Submission {
            name,
            script_path,
            queue: node.queue().map(str::to_string),
            holds,
            tasks: node.is_group().then(|| node.tasks()),
        };
        self.scheduler.submit(&submission).await?;
        graph.mark_submitted(id)?;

        let tasks = submission.tasks.unwrap_or(1);
        info!(
            job = %submission.name,
            holds = %submission.holds.join(","),
            tasks,
            "submitted"
        );
        if let Some(ref bus) = self.event_bus {
            bus.emit(Event::job_submitted(
                self.run_id.clone(),
                submission.name,
                submission.holds,
                tasks,
            ))
            .await;
        }
        Ok(())
    }

    /// Poll until a submitted node leaves the scheduler's active set.
    ///
    /// Intervals follow `backoff`: the first is its minimum and each retry
    /// doubles up to the ceiling. Cancelling `cancel` abandons the wait at
    /// the next sleep; the grid job itself keeps running.
    pub async fn wait(
        &self,
        graph: &DependencyGraph,
        id: NodeId,
        backoff: &PollBackoff,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, ExecuteError> {
        let node = graph.get(id)?;
        if !node.is_submitted() {
            return Err(GraphError::NotSubmitted(node.name().to_string()).into());
        }
        let name = self.grid_name(node.name());
        Ok(poll_until_dequeued(self.scheduler.as_ref(), &name, backoff, cancel).await?)
    }

    /// Wait for every submitted node concurrently.
    ///
    /// Each node gets one record, keyed by its graph name. Dequeued nodes
    /// are [`JobStatus::Dequeued`]; nodes that were never submitted are
    /// `Skipped`; a wait abandoned through `cancel` leaves its node
    /// `Running` and marks the result set cancelled; a failing status
    /// query is recorded as `Failed` with the query error.
    pub async fn wait_all(
        &self,
        graph: &DependencyGraph,
        cancel: &CancellationToken,
    ) -> Result<RunResults, ExecuteError> {
        let start = Instant::now();
        let mut results = RunResults::new(self.run_id.clone());
        let mut set = JoinSet::new();
        let mut waiting = Vec::new();

        for (id, node) in graph.nodes() {
            if !node.is_submitted() {
                results.insert(JobResult::skipped(id, node.name(), None));
                continue;
            }
            let scheduler = Arc::clone(&self.scheduler);
            let backoff = self.config.backoff;
            let cancel = cancel.clone();
            let node_name = node.name().to_string();
            let grid_name = self.grid_name(&node_name);
            let span = info_span!("grid_wait", job = %grid_name);
            waiting.push((id, node_name.clone()));

            set.spawn(
                async move {
                    let outcome =
                        poll_until_dequeued(scheduler.as_ref(), &grid_name, &backoff, &cancel)
                            .await;
                    (id, node_name, grid_name, outcome)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = set.join_next().await {
            let (id, node_name, grid_name, outcome) = match joined {
                Ok(joined) => joined,
                Err(err) => {
                    warn!(error = %err, "wait task failed");
                    continue;
                }
            };

            match outcome {
                Ok(WaitOutcome::Dequeued { waited, polls }) => {
                    let mut result = JobResult::empty(id, &node_name, None, JobStatus::Dequeued);
                    result.duration = waited;
                    result.finished_at = Some(Utc::now());
                    debug!(job = %grid_name, polls, "dequeued");
                    if let Some(ref bus) = self.event_bus {
                        bus.emit(Event::job_dequeued(self.run_id.clone(), grid_name, waited))
                            .await;
                    }
                    results.insert(result);
                }
                Ok(WaitOutcome::Cancelled { .. }) => {
                    results.cancelled = true;
                    results.insert(JobResult::empty(id, &node_name, None, JobStatus::Running));
                }
                Err(err) => {
                    warn!(job = %grid_name, error = %err, "status query failed");
                    let mut result = JobResult::empty(id, &node_name, None, JobStatus::Failed);
                    result.error = Some(err.to_string());
                    results.insert(result);
                }
            }
        }

        for (id, node_name) in waiting {
            if results.get(&node_name).is_none() {
                let mut result = JobResult::empty(id, &node_name, None, JobStatus::Failed);
                result.error = Some("wait task failed".to_string());
                results.insert(result);
            }
        }

        results.duration = start.elapsed();
        Ok(results)
    }

    /// Submit the whole graph and wait for every node to leave the queue.
    pub async fn run(
        &self,
        graph: &mut DependencyGraph,
        cancel: &CancellationToken,
    ) -> Result<RunResults, ExecuteError> {
        let start = Instant::now();
        self.submit(graph).await?;
        let mut results = self
            .wait_all(graph, cancel)
            .instrument(info_span!("grid_run", run = %self.run_id.short()))
            .await?;
        results.duration = start.elapsed();

        info!(
            dequeued = results.count(JobStatus::Dequeued),
            cancelled = results.cancelled,
            duration_ms = %results.duration.as_millis(),
            "grid run finished"
        );
        if let Some(ref bus) = self.event_bus {
            bus.emit(Event::run_completed(
                self.run_id.clone(),
                results.success(),
                results.duration,
            ))
            .await;
        }
        Ok(results)
    }

    async fn prepare_directories(&self) -> Result<(), GridError> {
        for dir in [&self.config.script_dir, &self.config.output_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| GridError::ScriptWrite {
                    path: dir.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

async fn write_script(path: &Path, body: &str) -> Result<(), GridError> {
    let contents = format!("{}{}", SCRIPT_HEADER, body);
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| GridError::ScriptWrite {
            path: path.to_path_buf(),
            source,
        })
}

/// Poll `name` until it is no longer active or `cancel` fires.
async fn poll_until_dequeued<S: GridScheduler + ?Sized>(
    scheduler: &S,
    name: &str,
    backoff: &PollBackoff,
    cancel: &CancellationToken,
) -> Result<WaitOutcome, GridError> {
    let start = Instant::now();
    let mut polls = 0u32;
    let mut interval = backoff.initial.min(backoff.ceiling);

    loop {
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Cancelled { polls });
        }

        polls += 1;
        if !scheduler.is_active(name).await? {
            return Ok(WaitOutcome::Dequeued {
                polls,
                waited: start.elapsed(),
            });
        }

        debug!(job = %name, polls, interval_ms = %interval.as_millis(), "still active");
        tokio::select! {
            _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled { polls }),
            _ = tokio::time::sleep(interval) => {}
        }
        interval = backoff.next(interval);
    }
}
