//! Dependency graph for task scheduling.
//!
//! The graph tracks which tasks wait on which as a directed acyclic graph.
//! Nodes are task identifiers only; the orchestrator's registry owns the
//! task records. Edges point from a dependency to its dependent, so
//! execution order follows edge direction.

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::core::task::TaskId;
use crate::error::{Error, Result};

/// The task dependency graph.
///
/// Ids may be inserted before the corresponding task is submitted (forward
/// references); such placeholder nodes participate in cycle detection like
/// any other node.
pub struct DepGraph {
    /// The underlying directed graph.
    graph: DiGraph<TaskId, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    index: HashMap<TaskId, NodeIndex>,
}

impl DepGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Insert a node for the given id.
    ///
    /// Returns `true` if the node was newly created, `false` if it already
    /// existed.
    pub fn insert(&mut self, id: &TaskId) -> bool {
        if self.index.contains_key(id) {
            return false;
        }
        let node = self.graph.add_node(id.clone());
        self.index.insert(id.clone(), node);
        true
    }

    /// Commit edges from every id in `deps` to `dependent`, all or nothing.
    ///
    /// The proposed edges are added tentatively and checked against the
    /// union of existing and proposed edges; if any cycle would result, every
    /// tentative edge is removed before returning an error. Duplicate edges
    /// are skipped.
    ///
    /// # Errors
    /// Returns an error if any involved id has no node, or if the edges
    /// would create a cycle.
    pub fn connect_all(&mut self, deps: &[TaskId], dependent: &TaskId) -> Result<()> {
        let to = self.node_of(dependent)?;

        let mut added = Vec::with_capacity(deps.len());
        for dep in deps {
            let from = match self.node_of(dep) {
                Ok(node) => node,
                Err(err) => {
                    self.rollback_edges(added);
                    return Err(err);
                }
            };
            if self.graph.find_edge(from, to).is_some() {
                continue;
            }
            added.push(self.graph.add_edge(from, to, ()));
        }

        if is_cyclic_directed(&self.graph) {
            self.rollback_edges(added);
            return Err(Error::DependencyCycle(format!(
                "dependencies of task {} would close a cycle",
                dependent
            )));
        }

        Ok(())
    }

    // Remove tentative edges in reverse insertion order, since removing an
    // edge invalidates the highest edge index.
    fn rollback_edges(&mut self, added: Vec<petgraph::graph::EdgeIndex>) {
        for edge in added.into_iter().rev() {
            self.graph.remove_edge(edge);
        }
    }

    fn node_of(&self, id: &TaskId) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::Validation(format!("task {} not in dependency graph", id)))
    }

    /// Ids the given task depends on.
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Ids that depend on the given task.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<TaskId> {
        if let Some(&node) = self.index.get(id) {
            self.graph
                .neighbors_directed(node, direction)
                .filter_map(|n| self.graph.node_weight(n).cloned())
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Every task reachable from `id` along dependent edges, excluding `id`
    /// itself. Diamond shapes are visited once.
    pub fn transitive_dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };

        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut stack: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(start, Direction::Outgoing)
            .collect();
        let mut result = Vec::new();

        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if let Some(task_id) = self.graph.node_weight(node) {
                result.push(task_id.clone());
            }
            stack.extend(self.graph.neighbors_directed(node, Direction::Outgoing));
        }

        result
    }

    /// Remove a node and its edges.
    ///
    /// Returns `true` if the node existed. petgraph swap-removes, so the
    /// index entry of the node that took the removed slot is repaired.
    pub fn remove(&mut self, id: &TaskId) -> bool {
        let Some(node) = self.index.remove(id) else {
            return false;
        };
        self.graph.remove_node(node);
        if let Some(moved) = self.graph.node_weight(node).cloned() {
            self.index.insert(moved, node);
        }
        true
    }

    /// Check if the graph contains a node for the id.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl Default for DepGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DepGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepGraph")
            .field("tasks", &self.node_count())
            .field("dependencies", &self.edge_count())
            .finish()
    }
}
