//! Configuration loading and parsing.
//!
//! This module provides YAML job files and run settings.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{GraphBuilder, load_job_file};
pub use error::ConfigError;
pub use types::{BatchConfig, GroupConfig, JobConfig, JobFileConfig, RunConfig, SchedulerKind};
pub use yaml::YamlLoader;
