//! Graph builder from YAML configuration.
//!
//! Converts a [`JobFileConfig`] into a validated [`DependencyGraph`].

use std::path::Path;

use crate::core::batch::compile_job_groups;
use crate::core::graph::DependencyGraph;
use crate::core::group::JobGroup;
use crate::core::job::Job;

use super::error::ConfigError;
use super::types::JobFileConfig;
use super::yaml::YamlLoader;

/// Builder for creating graphs from a job file.
pub struct GraphBuilder;

impl GraphBuilder {
    /// Build a graph from a parsed job file.
    ///
    /// Nodes are added in file order (jobs, then groups, then batches) and
    /// dependencies are wired afterwards, so `depends_on` may name nodes
    /// declared later in the file. The graph is validated before it is
    /// returned.
    pub fn build(config: &JobFileConfig) -> Result<DependencyGraph, ConfigError> {
        let mut graph = DependencyGraph::new();

        for job in &config.jobs {
            let mut node = Job::new(&job.name, &job.command);
            if let Some(ref queue) = job.queue {
                node = node.with_queue(queue);
            }
            graph.add(node)?;
        }

        for group in &config.groups {
            let mut node = JobGroup::new(&group.name, &group.command, group.arguments.clone())?;
            if let Some(ref queue) = group.queue {
                node = node.with_queue(queue);
            }
            graph.add(node)?;
        }

        for batch in &config.batches {
            let jobs: Vec<Job> = batch
                .commands
                .iter()
                .enumerate()
                .map(|(i, command)| {
                    let job = Job::new(format!("{}_cmd{}", batch.prefix, i + 1), command);
                    match batch.queue {
                        Some(ref queue) => job.with_queue(queue),
                        None => job,
                    }
                })
                .collect();
            for group in compile_job_groups(&jobs, &batch.prefix, batch.group_size)? {
                graph.add(group)?;
            }
        }

        let edges = config
            .jobs
            .iter()
            .map(|job| (&job.name, &job.depends_on))
            .chain(config.groups.iter().map(|group| (&group.name, &group.depends_on)));

        for (name, depends_on) in edges {
            let node = graph.find(name).ok_or_else(|| {
                ConfigError::InvalidConfig(format!("node '{}' missing from graph", name))
            })?;
            for dep in depends_on {
                let dependency =
                    graph
                        .find(dep)
                        .ok_or_else(|| ConfigError::UnknownDependency {
                            node: name.clone(),
                            dependency: dep.clone(),
                        })?;
                graph.add_dependency(node, dependency)?;
            }
        }

        graph.validate()?;
        Ok(graph)
    }
}

/// Load, validate and build the graph described by a job file.
pub fn load_job_file(path: impl AsRef<Path>) -> Result<DependencyGraph, ConfigError> {
    let config = YamlLoader::load_job_file(path)?;
    GraphBuilder::build(&config)
}
