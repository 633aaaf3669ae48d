//! The graph node sum type.
//!
//! Executors never care whether they hold a [`Job`] or a [`JobGroup`]; they
//! work through the capability set on [`Node`].

use std::borrow::Cow;

use super::graph::GraphError;
use super::group::JobGroup;
use super::job::Job;
use super::types::NodeId;

/// A schedulable unit in a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A single command.
    Job(Job),
    /// A parameter sweep expanded into `tasks` invocations.
    Group(JobGroup),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Job(job) => job.name(),
            Node::Group(group) => group.name(),
        }
    }

    pub fn command(&self) -> &str {
        match self {
            Node::Job(job) => job.command(),
            Node::Group(group) => group.command(),
        }
    }

    pub fn queue(&self) -> Option<&str> {
        match self {
            Node::Job(job) => job.queue(),
            Node::Group(group) => group.queue(),
        }
    }

    pub fn dependencies(&self) -> &[NodeId] {
        match self {
            Node::Job(job) => job.dependencies(),
            Node::Group(group) => group.dependencies(),
        }
    }

    /// Number of concrete invocations: 1 for a job.
    pub fn tasks(&self) -> usize {
        match self {
            Node::Job(_) => 1,
            Node::Group(group) => group.tasks(),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Node::Group(_))
    }

    /// The script handed to the execution boundary.
    ///
    /// A job's script is its command; a group's is its generated control
    /// script.
    pub fn script(&self) -> Cow<'_, str> {
        match self {
            Node::Job(job) => Cow::Borrowed(job.command()),
            Node::Group(group) => Cow::Owned(group.generate_script()),
        }
    }

    pub fn is_submitted(&self) -> bool {
        match self {
            Node::Job(job) => job.is_submitted(),
            Node::Group(group) => group.is_submitted(),
        }
    }

    /// Record that the node has been handed to an executor.
    pub fn mark_submitted(&mut self) -> Result<(), GraphError> {
        if self.is_submitted() {
            return Err(GraphError::AlreadySubmitted(self.name().to_string()));
        }
        match self {
            Node::Job(job) => job.set_submitted(),
            Node::Group(group) => group.set_submitted(),
        }
        Ok(())
    }

    pub(crate) fn add_dependency(&mut self, dependency: NodeId) {
        let deps = self.dependencies_mut();
        if !deps.contains(&dependency) {
            deps.push(dependency);
        }
    }

    /// Returns false, leaving the list untouched, if `dependency` is absent.
    pub(crate) fn remove_dependency(&mut self, dependency: NodeId) -> bool {
        let deps = self.dependencies_mut();
        match deps.iter().position(|d| *d == dependency) {
            Some(pos) => {
                deps.remove(pos);
                true
            }
            None => false,
        }
    }

    fn dependencies_mut(&mut self) -> &mut Vec<NodeId> {
        match self {
            Node::Job(job) => job.dependencies_mut(),
            Node::Group(group) => group.dependencies_mut(),
        }
    }
}

impl From<Job> for Node {
    fn from(job: Job) -> Self {
        Node::Job(job)
    }
}

impl From<JobGroup> for Node {
    fn from(group: JobGroup) -> Self {
        Node::Group(group)
    }
}
