//! Execution engines.
//!
//! Two executors consume a [`DependencyGraph`]:
//!
//! - [`LocalPoolExecutor`] runs tiers on a bounded pool of local workers
//! - [`GridExecutor`] submits every node to a grid scheduler with native holds
//!
//! [`execute`] picks one from an [`ExecutionMode`].

mod command;
mod grid;
mod pool;
mod result;

pub use command::{CommandError, CommandOutput, DEFAULT_SHELL, ShellCommand, ShellCommandBuilder};
pub use grid::{
    GridConfig, GridError, GridExecutor, GridScheduler, SgeScheduler, Submission, WaitOutcome,
};
pub use pool::LocalPoolExecutor;
pub use result::{JobResult, JobStatus, RunResults};

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::graph::{DependencyGraph, GraphError};
use crate::events::EventBus;

/// Errors that stop an executor before it produces a result set.
///
/// A job that runs and fails is not an error; it is a
/// [`JobStatus::Failed`] record in the results.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Grid(#[from] GridError),

    /// A local control script could not be written.
    #[error("failed to write control script '{}': {source}", .path.display())]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a graph runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Tier by tier on this machine.
    Local { workers: usize },
    /// On a Sun Grid Engine cluster.
    Grid(GridConfig),
}

/// Run a graph in the given mode.
pub async fn execute(
    graph: &mut DependencyGraph,
    mode: &ExecutionMode,
    cancel: &CancellationToken,
) -> Result<RunResults, ExecuteError> {
    dispatch(graph, mode, cancel, None).await
}

/// Run a graph, reporting progress to `events`.
pub async fn execute_with_events(
    graph: &mut DependencyGraph,
    mode: &ExecutionMode,
    cancel: &CancellationToken,
    events: Arc<EventBus>,
) -> Result<RunResults, ExecuteError> {
    dispatch(graph, mode, cancel, Some(events)).await
}

async fn dispatch(
    graph: &mut DependencyGraph,
    mode: &ExecutionMode,
    cancel: &CancellationToken,
    events: Option<Arc<EventBus>>,
) -> Result<RunResults, ExecuteError> {
    match mode {
        ExecutionMode::Local { workers } => {
            let mut executor = LocalPoolExecutor::new(*workers);
            if let Some(bus) = events {
                executor = executor.with_event_bus(bus);
            }
            executor.run_until_cancelled(graph, cancel).await
        }
        ExecutionMode::Grid(config) => {
            let mut executor = GridExecutor::sge(config.clone());
            if let Some(bus) = events {
                executor = executor.with_event_bus(bus);
            }
            executor.run(graph, cancel).await
        }
    }
}
