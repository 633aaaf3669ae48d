//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::graph::GraphError;

/// Errors that can occur when loading job files and run settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file.
    #[error("failed to read file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Failed to parse YAML from a specific file.
    #[error("YAML parse error in '{path}': {source}")]
    YamlFileError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// `depends_on` names something that is neither a job nor a group.
    #[error("'{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    /// The described graph is not valid.
    #[error(transparent)]
    Graph(#[from] GraphError),
}
