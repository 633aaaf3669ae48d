//! Single shell-command jobs.

use super::types::NodeId;

/// A single named shell command with the jobs it must wait for.
///
/// The command string is opaque: it is handed to bash as-is and never
/// parsed, both on the local pool and inside a grid script. Dependencies are [`NodeId`] handles into the owning
/// [`DependencyGraph`](super::graph::DependencyGraph).
///
/// # Example
///
/// ```
/// use jobgraph::{DependencyGraph, Job};
///
/// let mut graph = DependencyGraph::new();
/// let extract = graph.add(Job::new("extract", "extract.sh")).unwrap();
/// let align = graph
///     .add(Job::new("align", "mafft in.fasta > out.aln").with_queue("all.q").depends_on(extract))
///     .unwrap();
///
/// assert_eq!(graph.dependencies(align), &[extract]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    name: String,
    command: String,
    queue: Option<String>,
    dependencies: Vec<NodeId>,
    submitted: bool,
}

impl Job {
    /// Create a job with no queue hint and no dependencies.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            queue: None,
            dependencies: Vec::new(),
            submitted: false,
        }
    }

    /// Set the grid queue this job should be submitted to.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Declare a dependency before the job is added to a graph.
    pub fn depends_on(mut self, dependency: NodeId) -> Self {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub(crate) fn dependencies_mut(&mut self) -> &mut Vec<NodeId> {
        &mut self.dependencies
    }

    pub(crate) fn set_submitted(&mut self) {
        self.submitted = true;
    }
}
