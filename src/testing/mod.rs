//! Testing utilities for users of the jobgraph library.
//!
//! - [`ScriptedScheduler`]: an in-memory [`GridScheduler`] whose jobs stay
//!   active for a fixed number of status queries
//! - [`chain`] and [`diamond`]: small graphs of shell jobs

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::time::Instant;

use crate::core::graph::{DependencyGraph, GraphError};
use crate::core::job::Job;
use crate::core::types::NodeId;
use crate::execution::{GridError, GridScheduler, Submission};

#[derive(Debug, Default)]
struct SchedulerState {
    submissions: Vec<Submission>,
    polls: HashMap<String, Vec<Instant>>,
}

/// A grid scheduler that records everything and runs nothing.
///
/// A submitted job reports active for its first `active_polls` status
/// queries and inactive afterwards. Unknown names are never active. Poll
/// times use the tokio clock, so they are exact under a paused runtime.
///
/// # Example
///
/// ```
/// use jobgraph::testing::ScriptedScheduler;
///
/// let scheduler = ScriptedScheduler::new(3).with_active_polls("slow", 10);
/// assert!(scheduler.submissions().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct ScriptedScheduler {
    active_polls: usize,
    overrides: HashMap<String, usize>,
    rejected: HashSet<String>,
    broken_status: HashSet<String>,
    state: Mutex<SchedulerState>,
}

impl ScriptedScheduler {
    /// Every job stays active for `active_polls` queries.
    pub fn new(active_polls: usize) -> Self {
        Self {
            active_polls,
            ..Self::default()
        }
    }

    /// Keep `name` active for a different number of queries.
    pub fn with_active_polls(mut self, name: impl Into<String>, polls: usize) -> Self {
        self.overrides.insert(name.into(), polls);
        self
    }

    /// Refuse submissions of `name`.
    pub fn rejecting(mut self, name: impl Into<String>) -> Self {
        self.rejected.insert(name.into());
        self
    }

    /// Fail every status query for `name`.
    pub fn failing_status(mut self, name: impl Into<String>) -> Self {
        self.broken_status.insert(name.into());
        self
    }

    /// Accepted submissions, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    /// Times at which `name` was queried.
    pub fn poll_times(&self, name: &str) -> Vec<Instant> {
        self.lock().polls.get(name).cloned().unwrap_or_default()
    }

    pub fn poll_count(&self, name: &str) -> usize {
        self.lock().polls.get(name).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl GridScheduler for ScriptedScheduler {
    async fn submit(&self, submission: &Submission) -> Result<(), GridError> {
        if self.rejected.contains(&submission.name) {
            return Err(GridError::Rejected {
                name: submission.name.clone(),
                code: Some(1),
                stderr: "submission refused".to_string(),
            });
        }
        self.lock().submissions.push(submission.clone());
        Ok(())
    }

    async fn is_active(&self, name: &str) -> Result<bool, GridError> {
        if self.broken_status.contains(name) {
            return Err(GridError::StatusQuery {
                name: name.to_string(),
                reason: "scheduler unavailable".to_string(),
            });
        }

        let mut state = self.lock();
        if !state.submissions.iter().any(|s| s.name == name) {
            return Ok(false);
        }
        let polls = state.polls.entry(name.to_string()).or_default();
        polls.push(Instant::now());

        let limit = self.overrides.get(name).copied().unwrap_or(self.active_polls);
        Ok(polls.len() <= limit)
    }
}

/// A linear chain of jobs, each depending on the one before.
pub fn chain<S: AsRef<str>>(
    names: &[S],
    command: impl Fn(&str) -> String,
) -> Result<(DependencyGraph, Vec<NodeId>), GraphError> {
    let mut graph = DependencyGraph::new();
    let mut ids: Vec<NodeId> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        let mut job = Job::new(name, command(name));
        if let Some(&previous) = ids.last() {
            job = job.depends_on(previous);
        }
        ids.push(graph.add(job)?);
    }
    Ok((graph, ids))
}

/// `top -> (left, right) -> bottom`.
pub fn diamond(command: impl Fn(&str) -> String) -> Result<DependencyGraph, GraphError> {
    let mut graph = DependencyGraph::new();
    let top = graph.add(Job::new("top", command("top")))?;
    let left = graph.add(Job::new("left", command("left")).depends_on(top))?;
    let right = graph.add(Job::new("right", command("right")).depends_on(top))?;
    graph.add(
        Job::new("bottom", command("bottom"))
            .depends_on(left)
            .depends_on(right),
    )?;
    Ok(graph)
}
