//! jobgraph - dependency-ordered execution of shell jobs.
//!
//! Build a [`DependencyGraph`] of [`Job`]s and parameter-sweep
//! [`JobGroup`]s, then run it tier by tier on a local worker pool or submit
//! it to a grid scheduler with native dependency holds.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod testing;

pub use config::{ConfigError, GraphBuilder, JobFileConfig, RunConfig, YamlLoader, load_job_file};
pub use core::backoff::PollBackoff;
pub use core::batch::compile_job_groups;
pub use core::graph::{DependencyGraph, GraphError, Tier};
pub use core::group::{Arguments, JobGroup, TASK_ID_VAR};
pub use core::job::Job;
pub use core::node::Node;
pub use core::types::{NodeId, RunId};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    CommandError, ExecuteError, ExecutionMode, GridConfig, GridError, GridExecutor, GridScheduler,
    JobResult, JobStatus, LocalPoolExecutor, RunResults, SgeScheduler, ShellCommand, WaitOutcome,
    execute, execute_with_events,
};
