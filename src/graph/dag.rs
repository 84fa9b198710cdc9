//! The resource graph.
//!
//! A [`ResourceGraph`] is only produced by the
//! [`GraphBuilder`](super::GraphBuilder), which guarantees that it is acyclic and
//! that every dependency resolves. The graph exposes read-only accessors.

use std::collections::HashMap;

use super::node::ResourceNode;

/// An acyclic graph of resource nodes, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// Nodes in declaration order.
    nodes: Vec<ResourceNode>,
    /// Identifier to declaration index.
    index: HashMap<String, usize>,
    /// For each node, the indices of the nodes that depend on it.
    dependents: Vec<Vec<usize>>,
    /// For each node, the indices of the nodes it depends on.
    dependencies: Vec<Vec<usize>>,
    /// Depth-first post-order (dependencies before dependents).
    dependency_order: Vec<usize>,
}

impl ResourceGraph {
    /// Assembles a graph from validated nodes and their DFS post-order.
    pub(super) fn from_parts(nodes: Vec<ResourceNode>, dependency_order: Vec<usize>) -> Self {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut dependents = vec![Vec::new(); nodes.len()];
        let mut dependencies = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for dep in &node.dependencies {
                if let Some(&d) = index.get(dep) {
                    dependents[d].push(i);
                    dependencies[i].push(d);
                }
            }
        }

        Self {
            nodes,
            index,
            dependents,
            dependencies,
            dependency_order,
        }
    }

    /// Returns all nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Returns a node by identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Returns true if the graph contains `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the declaration position of a node.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the number of dependency edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(Vec::len).sum()
    }

    /// Returns the nodes that depend directly on `id`.
    #[must_use]
    pub fn dependents(&self, id: &str) -> Vec<&ResourceNode> {
        self.index
            .get(id)
            .map(|&i| self.dependents[i].iter().map(|&d| &self.nodes[d]).collect())
            .unwrap_or_default()
    }

    /// Returns nodes in an order where every node follows its dependencies.
    pub fn dependency_order(&self) -> impl Iterator<Item = &ResourceNode> {
        self.dependency_order.iter().map(|&i| &self.nodes[i])
    }

    /// Indices of the nodes that depend on the node at `idx`.
    pub(crate) fn dependent_indices(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Number of dependencies of the node at `idx`.
    pub(crate) fn in_degree(&self, idx: usize) -> usize {
        self.dependencies[idx].len()
    }
}

impl std::fmt::Display for ResourceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Resource graph ({} nodes, {} edges):", self.len(), self.edge_count())?;
        for node in self.dependency_order() {
            if node.dependencies.is_empty() {
                writeln!(f, "  {node}")?;
            } else {
                writeln!(f, "  {node} <- {}", node.dependencies.join(", "))?;
            }
        }
        Ok(())
    }
}
