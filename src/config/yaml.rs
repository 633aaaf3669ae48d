//! YAML configuration parsing.
//!
//! Parses job files and run settings, and checks what can be checked
//! without building the graph: names are present and unique, and every
//! dependency names a known node. Cycles are left to the graph.

use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::{JobFileConfig, RunConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a job file.
    pub fn load_job_file(path: impl AsRef<Path>) -> Result<JobFileConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        let config: JobFileConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_job_file(&config)?;
        Ok(config)
    }

    /// Parse a job file from a YAML string.
    pub fn parse_job_file(yaml: &str) -> Result<JobFileConfig, ConfigError> {
        let config: JobFileConfig = serde_yaml::from_str(yaml)?;
        Self::validate_job_file(&config)?;
        Ok(config)
    }

    /// Load run settings.
    pub fn load_run_config(path: impl AsRef<Path>) -> Result<RunConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        let config: RunConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_run_config(&config)?;
        Ok(config)
    }

    /// Parse run settings from a YAML string.
    pub fn parse_run_config(yaml: &str) -> Result<RunConfig, ConfigError> {
        let config: RunConfig = serde_yaml::from_str(yaml)?;
        Self::validate_run_config(&config)?;
        Ok(config)
    }

    fn validate_job_file(config: &JobFileConfig) -> Result<(), ConfigError> {
        let mut names: HashSet<&str> = HashSet::new();
        let declared = config
            .jobs
            .iter()
            .map(|job| (job.name.as_str(), job.command.as_str()))
            .chain(
                config
                    .groups
                    .iter()
                    .map(|group| (group.name.as_str(), group.command.as_str())),
            );

        for (name, command) in declared {
            if name.is_empty() {
                return Err(ConfigError::MissingField("name".into()));
            }
            if command.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("{}.command", name)));
            }
            if !names.insert(name) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate node name: {}",
                    name
                )));
            }
        }

        for batch in &config.batches {
            if batch.prefix.is_empty() {
                return Err(ConfigError::MissingField("batch prefix".into()));
            }
            if batch.group_size == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "batch '{}': group_size cannot be zero",
                    batch.prefix
                )));
            }
        }

        let edges = config
            .jobs
            .iter()
            .map(|job| (job.name.as_str(), &job.depends_on))
            .chain(
                config
                    .groups
                    .iter()
                    .map(|group| (group.name.as_str(), &group.depends_on)),
            );

        for (name, depends_on) in edges {
            let mut seen = HashSet::new();
            for dep in depends_on {
                if dep == name {
                    return Err(ConfigError::InvalidConfig(format!(
                        "'{}' cannot depend on itself",
                        name
                    )));
                }
                if !names.contains(dep.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        node: name.to_string(),
                        dependency: dep.clone(),
                    });
                }
                if !seen.insert(dep) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "'{}' has duplicate dependency '{}'",
                        name, dep
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_run_config(config: &RunConfig) -> Result<(), ConfigError> {
        if config.workers == Some(0) {
            return Err(ConfigError::InvalidConfig("workers cannot be zero".into()));
        }
        if config.grid.backoff.initial.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "grid.backoff.initial_ms cannot be zero".into(),
            ));
        }
        if config.grid.backoff.ceiling < config.grid.backoff.initial {
            return Err(ConfigError::InvalidConfig(
                "grid.backoff.ceiling_ms cannot be below initial_ms".into(),
            ));
        }
        Ok(())
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}
