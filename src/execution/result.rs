//! Per-job result records and the result set returned to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::types::{NodeId, RunId};

/// Status of a job, or of one task of a group, within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its tier.
    Pending,
    /// Dispatched and not yet finished.
    Running,
    /// The command exited with status 0.
    Succeeded,
    /// The command exited non-zero or could not be started.
    Failed,
    /// Never dispatched: an earlier tier failed or the run was cancelled.
    Skipped,
    /// The grid scheduler no longer lists the job.
    ///
    /// Polling cannot tell a successful grid job from a failed one; both
    /// simply leave the active set. Callers that need the distinction must
    /// inspect the job's own output artifacts.
    Dequeued,
}

impl JobStatus {
    /// Whether the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped | JobStatus::Dequeued
        )
    }
}

/// Outcome of one unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    /// Job name, or `group[index]` for a group task.
    pub name: String,
    /// Graph node the unit came from.
    pub node: NodeId,
    /// 0-based task index for group tasks.
    pub task_index: Option<usize>,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    /// Wall-clock time from start to finish.
    pub duration: Duration,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl JobResult {
    /// Name under which a unit is reported.
    pub fn unit_name(node_name: &str, task_index: Option<usize>) -> String {
        match task_index {
            Some(index) => format!("{}[{}]", node_name, index),
            None => node_name.to_string(),
        }
    }

    /// A record for a unit that never ran.
    pub fn skipped(node: NodeId, node_name: &str, task_index: Option<usize>) -> Self {
        Self::empty(node, node_name, task_index, JobStatus::Skipped)
    }

    pub(crate) fn empty(
        node: NodeId,
        node_name: &str,
        task_index: Option<usize>,
        status: JobStatus,
    ) -> Self {
        Self {
            name: Self::unit_name(node_name, task_index),
            node,
            task_index,
            status,
            exit_code: None,
            duration: Duration::ZERO,
            started_at: None,
            finished_at: None,
            error: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Complete result set for one run.
///
/// Every unit of the graph has exactly one entry, whether or not it ran.
#[derive(Debug, Clone, Serialize)]
pub struct RunResults {
    pub run_id: RunId,
    /// Records keyed by unit name.
    pub jobs: BTreeMap<String, JobResult>,
    /// Tier whose failure stopped a local run.
    pub halted_at_tier: Option<usize>,
    /// Whether the run was cancelled before it finished.
    pub cancelled: bool,
    pub duration: Duration,
}

impl RunResults {
    pub(crate) fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            jobs: BTreeMap::new(),
            halted_at_tier: None,
            cancelled: false,
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn insert(&mut self, result: JobResult) {
        self.jobs.insert(result.name.clone(), result);
    }

    pub fn get(&self, name: &str) -> Option<&JobResult> {
        self.jobs.get(name)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// No failures, no skips, no cancellation.
    ///
    /// Grid results count as successful here because their outcome is not
    /// observable; see [`JobStatus::Dequeued`].
    pub fn success(&self) -> bool {
        !self.cancelled
            && self
                .jobs
                .values()
                .all(|r| matches!(r.status, JobStatus::Succeeded | JobStatus::Dequeued))
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.values().filter(|r| r.status == status).count()
    }

    /// Names of units with the given status.
    pub fn with_status(&self, status: JobStatus) -> Vec<&str> {
        self.jobs
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.with_status(JobStatus::Failed)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.with_status(JobStatus::Skipped)
    }
}
