//! Resource graph module.
//!
//! This module turns the declarations of a topology into an acyclic graph of
//! resource nodes with explicit dependency edges.

mod builder;
mod dag;
mod node;

pub use builder::GraphBuilder;
pub use dag::ResourceGraph;
pub use node::{PropertyBag, ResourceKind, ResourceNode, Wire};
