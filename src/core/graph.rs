//! Dependency graph of jobs and job groups.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. A node may
//! only start once every node it depends on has finished, so the graph must
//! be acyclic; [`DependencyGraph::validate`] checks this before any executor
//! runs, and [`DependencyGraph::tiers`] partitions the nodes into waves for
//! the local pool.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use super::node::Node;
use super::types::NodeId;

/// Errors raised while building or validating a graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The graph contains a cycle running through the named node.
    #[error("cycle detected involving node: {0}")]
    CycleDetected(String),

    /// A node with this name is already registered.
    #[error("duplicate node name: {0}")]
    DuplicateName(String),

    /// Brackets are reserved for naming group tasks, `group[index]`.
    #[error("invalid node name '{0}': '[' and ']' are reserved for group tasks")]
    InvalidName(String),

    /// Removal of a dependency that was never added.
    #[error("'{node}' does not depend on '{dependency}'")]
    DependencyNotFound { node: String, dependency: String },

    /// A handle that this graph never issued.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// The node was already handed to an executor.
    #[error("node already submitted: {0}")]
    AlreadySubmitted(String),

    /// The node has not been handed to an executor yet.
    #[error("node not submitted: {0}")]
    NotSubmitted(String),

    /// A group parameter with no values would expand to zero tasks.
    #[error("group '{group}': parameter '{parameter}' has no values")]
    EmptyParameter { group: String, parameter: String },

    /// The group's parameter combinations do not fit in a task count.
    #[error("group '{0}' expands to more tasks than can be counted")]
    TooManyTasks(String),

    /// A group parameter name that cannot be used as a shell variable.
    #[error("group '{group}': '{parameter}' is not a valid parameter name")]
    InvalidParameter { group: String, parameter: String },

    /// Only independent jobs can be packed into a group.
    #[error("job '{0}' has dependencies and cannot be batched into a group")]
    GroupedJobHasDependencies(String),
}

/// One dependency wave.
///
/// Every dependency of a node in tier `k` lies in a tier `< k`, and at least
/// one lies in tier `k - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    index: usize,
    nodes: Vec<NodeId>,
}

impl Tier {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Nodes in this tier, in insertion order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Arena of [`Node`]s with index-based dependency edges.
///
/// The graph is built single-threaded, validated once, then handed to one
/// executor. Executors only flip each node's submitted flag.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    names: HashMap<String, NodeId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register a job or group and return its handle.
    ///
    /// Dependencies declared on the node beforehand must refer to nodes
    /// already in this graph.
    pub fn add(&mut self, node: impl Into<Node>) -> Result<NodeId, GraphError> {
        let node = node.into();
        if node.name().contains(['[', ']']) {
            return Err(GraphError::InvalidName(node.name().to_string()));
        }
        if self.names.contains_key(node.name()) {
            return Err(GraphError::DuplicateName(node.name().to_string()));
        }

        let id = NodeId::new(self.nodes.len());
        for dep in node.dependencies() {
            if *dep == id {
                return Err(GraphError::CycleDetected(node.name().to_string()));
            }
            if dep.index() >= self.nodes.len() {
                return Err(GraphError::NodeNotFound(*dep));
            }
        }

        self.names.insert(node.name().to_string(), id);
        self.nodes.push(node);
        Ok(id)
    }

    /// Make `node` wait for `dependency`. Adding an existing edge is a no-op.
    pub fn add_dependency(&mut self, node: NodeId, dependency: NodeId) -> Result<(), GraphError> {
        self.get(dependency)?;
        let target = self.get_mut(node)?;
        if node == dependency {
            return Err(GraphError::CycleDetected(target.name().to_string()));
        }
        target.add_dependency(dependency);
        Ok(())
    }

    /// Drop a previously added edge.
    pub fn remove_dependency(
        &mut self,
        node: NodeId,
        dependency: NodeId,
    ) -> Result<(), GraphError> {
        let dependency_name = self.get(dependency)?.name().to_string();
        let target = self.get_mut(node)?;
        if target.remove_dependency(dependency) {
            Ok(())
        } else {
            Err(GraphError::DependencyNotFound {
                node: target.name().to_string(),
                dependency: dependency_name,
            })
        }
    }

    pub fn get(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(id.index()).ok_or(GraphError::NodeNotFound(id))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Look a node up by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId::new(i), node))
    }

    /// Direct dependencies of a node. Empty for unknown handles.
    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.index())
            .map(|node| node.dependencies())
            .unwrap_or(&[])
    }

    /// Nodes that directly depend on `id`.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, node)| node.dependencies().contains(&id))
            .map(|(dependent, _)| dependent)
            .collect()
    }

    /// Record that a node has been handed to an executor.
    pub fn mark_submitted(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.get_mut(id)?.mark_submitted()
    }

    /// Check the graph is acyclic.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.depths().map(|_| ())
    }

    /// Partition the nodes into dependency tiers.
    ///
    /// Fails with [`GraphError::CycleDetected`] instead of returning a
    /// partial tiering.
    pub fn tiers(&self) -> Result<Vec<Tier>, GraphError> {
        let depths = self.depths()?;
        let count = depths.iter().max().map_or(0, |max| max + 1);

        let mut tiers: Vec<Tier> = (0..count)
            .map(|index| Tier {
                index,
                nodes: Vec::new(),
            })
            .collect();
        for (i, depth) in depths.into_iter().enumerate() {
            tiers[depth].nodes.push(NodeId::new(i));
        }
        Ok(tiers)
    }

    /// Nodes ordered so that every dependency precedes its dependents.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        Ok(self
            .tiers()?
            .into_iter()
            .flat_map(|tier| tier.nodes)
            .collect())
    }

    /// Longest-path depth of every node, via Kahn's algorithm.
    fn depths(&self) -> Result<Vec<usize>, GraphError> {
        let n = self.nodes.len();
        let mut pending: Vec<usize> = self
            .nodes
            .iter()
            .map(|node| node.dependencies().len())
            .collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, node) in self.nodes.iter().enumerate() {
            for dep in node.dependencies() {
                dependents[dep.index()].push(i);
            }
        }

        let mut depth = vec![0usize; n];
        let mut queue: VecDeque<usize> = (0..n).filter(|i| pending[*i] == 0).collect();
        let mut visited = 0;

        while let Some(i) = queue.pop_front() {
            visited += 1;
            for &next in &dependents[i] {
                depth[next] = depth[next].max(depth[i] + 1);
                pending[next] -= 1;
                if pending[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited != n {
            return Err(GraphError::CycleDetected(self.node_on_cycle(&pending)));
        }
        Ok(depth)
    }

    /// Name a node that lies on a cycle.
    ///
    /// Every node Kahn's algorithm left behind still has an unresolved
    /// dependency that was also left behind, so walking those edges must
    /// eventually revisit a node; the first revisited node is on a cycle.
    fn node_on_cycle(&self, pending: &[usize]) -> String {
        let Some(start) = pending.iter().position(|p| *p > 0) else {
            return String::new();
        };

        let mut seen = vec![false; self.nodes.len()];
        let mut current = start;
        while !seen[current] {
            seen[current] = true;
            match self.nodes[current]
                .dependencies()
                .iter()
                .find(|dep| pending[dep.index()] > 0)
            {
                Some(dep) => current = dep.index(),
                None => break,
            }
        }
        self.nodes[current].name().to_string()
    }
}
