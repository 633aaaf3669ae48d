//! Configuration type definitions.
//!
//! A job file describes the graph: `jobs`, parameter-sweep `groups` and
//! `batches` of independent commands packed into groups. A run config
//! describes how to execute it.

use serde::{Deserialize, Serialize};

use crate::core::group::Arguments;
use crate::execution::{ExecutionMode, GridConfig};

/// A job file.
///
/// ```yaml
/// jobs:
///   - name: extract
///     command: pdp extract config.json
/// groups:
///   - name: sweep
///     command: primersearch -mismatch $mm -in $infile
///     arguments:
///       mm: ["0", "1"]
///       infile: [a.fas, b.fas]
///     depends_on: [extract]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFileConfig {
    pub jobs: Vec<JobConfig>,
    pub groups: Vec<GroupConfig>,
    pub batches: Vec<BatchConfig>,
}

/// A single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique node name.
    pub name: String,
    /// Shell command, run verbatim.
    pub command: String,
    /// Grid queue; ignored locally.
    #[serde(default)]
    pub queue: Option<String>,
    /// Names of jobs or groups that must finish first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A parameter-sweep job group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    /// Command template referring to parameters as shell variables.
    pub command: String,
    #[serde(default)]
    pub queue: Option<String>,
    /// Ordered parameter values; the first parameter varies fastest.
    #[serde(default)]
    pub arguments: Arguments,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Independent commands packed into groups named `{prefix}_1`, `{prefix}_2`, ...
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub prefix: String,
    /// Most commands per group.
    #[serde(default = "default_group_size")]
    pub group_size: usize,
    #[serde(default)]
    pub queue: Option<String>,
    pub commands: Vec<String>,
}

fn default_group_size() -> usize {
    10_000
}

/// Which executor runs the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    #[default]
    Local,
    Grid,
}

/// Run settings.
///
/// ```yaml
/// scheduler: grid
/// grid:
///   prefix: pdp
///   backoff:
///     initial_ms: 100
///     ceiling_ms: 60000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub scheduler: SchedulerKind,
    /// Local worker count. Defaults to the available parallelism.
    pub workers: Option<usize>,
    pub grid: GridConfig,
}

impl RunConfig {
    /// Configured worker count, or the machine's available parallelism.
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// The execution mode these settings select.
    pub fn mode(&self) -> ExecutionMode {
        match self.scheduler {
            SchedulerKind::Local => ExecutionMode::Local {
                workers: self.workers(),
            },
            SchedulerKind::Grid => ExecutionMode::Grid(self.grid.clone()),
        }
    }
}
