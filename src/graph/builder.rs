//! Graph construction from resource declarations.
//!
//! The builder resolves every named reference, collapses repeated edges,
//! adds wiring sources as dependencies and rejects cycles. Cycle detection is a
//! depth-first traversal with white/gray/black marking: an edge into a gray
//! node closes a cycle, and the gray path from that node is reported. The
//! traversal keeps its own stack, so chain length is bounded by memory rather
//! than by the thread's stack.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::ResourceDecl;
use crate::error::GraphError;

use super::dag::ResourceGraph;
use super::node::ResourceNode;

/// Builds [`ResourceGraph`]s from declarations.
#[derive(Debug, Default)]
pub struct GraphBuilder;

/// DFS marking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// Not visited yet.
    White,
    /// On the current traversal path.
    Gray,
    /// Fully explored.
    Black,
}

/// State of one cycle-detection traversal.
struct Traversal<'a> {
    nodes: &'a [ResourceNode],
    index: &'a HashMap<&'a str, usize>,
    marks: Vec<Mark>,
    /// Gray path as (node, next dependency to follow).
    stack: Vec<(usize, usize)>,
    order: Vec<usize>,
}

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds a graph from declarations.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateIdentifier`] if two declarations share an
    /// identifier, [`GraphError::UnresolvedReference`] if a dependency or
    /// wiring source does not exist, and [`GraphError::CyclicDependency`] with
    /// the full cycle path if the dependencies are not acyclic.
    pub fn build(&self, decls: &[ResourceDecl]) -> Result<ResourceGraph, GraphError> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(decls.len());
        for decl in decls {
            if !seen.insert(decl.id.as_str()) {
                return Err(GraphError::DuplicateIdentifier {
                    id: decl.id.clone(),
                });
            }
        }

        let nodes = decls
            .iter()
            .map(|decl| Self::resolve(decl, &seen))
            .collect::<Result<Vec<_>, _>>()?;

        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut traversal = Traversal {
            nodes: &nodes,
            index: &index,
            marks: vec![Mark::White; nodes.len()],
            stack: Vec::new(),
            order: Vec::with_capacity(nodes.len()),
        };

        for start in 0..nodes.len() {
            if traversal.marks[start] == Mark::White {
                traversal.visit(start)?;
            }
        }

        let order = traversal.order;
        debug!("Built resource graph with {} nodes", nodes.len());
        Ok(ResourceGraph::from_parts(nodes, order))
    }

    /// Turns one declaration into a node with resolved, de-duplicated edges.
    fn resolve(decl: &ResourceDecl, known: &HashSet<&str>) -> Result<ResourceNode, GraphError> {
        let mut dependencies: Vec<String> = Vec::new();

        let wire_sources = decl.wiring.iter().map(|w| &w.source);
        for reference in decl.depends_on.iter().chain(wire_sources) {
            if !known.contains(reference.as_str()) {
                return Err(GraphError::UnresolvedReference {
                    resource: decl.id.clone(),
                    reference: reference.clone(),
                });
            }
            if !dependencies.contains(reference) {
                dependencies.push(reference.clone());
            }
        }

        Ok(ResourceNode {
            id: decl.id.clone(),
            kind: decl.kind,
            properties: decl.properties.clone(),
            dependencies,
            wiring: decl.wiring.clone(),
        })
    }
}

impl Traversal<'_> {
    /// Visits a node and everything it depends on, in post-order.
    fn visit(&mut self, root: usize) -> Result<(), GraphError> {
        let nodes = self.nodes;
        let index = self.index;
        self.enter(root);

        while let Some(&(idx, next)) = self.stack.last() {
            let Some(dep) = nodes[idx].dependencies.get(next) else {
                self.stack.pop();
                self.marks[idx] = Mark::Black;
                self.order.push(idx);
                continue;
            };
            let top = self.stack.len() - 1;
            self.stack[top].1 = next + 1;

            let Some(&d) = index.get(dep.as_str()) else {
                return Err(GraphError::UnresolvedReference {
                    resource: nodes[idx].id.clone(),
                    reference: dep.clone(),
                });
            };

            match self.marks[d] {
                Mark::Gray => return Err(self.cycle_through(d)),
                Mark::White => self.enter(d),
                Mark::Black => {}
            }
        }
        Ok(())
    }

    fn enter(&mut self, idx: usize) {
        self.marks[idx] = Mark::Gray;
        self.stack.push((idx, 0));
    }

    /// Builds the cycle error for a back edge into `target`.
    fn cycle_through(&self, target: usize) -> GraphError {
        let start = self.stack.iter().position(|&(p, _)| p == target).unwrap_or(0);
        let mut path: Vec<String> = self.stack[start..]
            .iter()
            .map(|&(p, _)| self.nodes[p].id.clone())
            .collect();
        path.push(self.nodes[target].id.clone());
        GraphError::CyclicDependency { path }
    }
}
