// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![warn(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stackplan
//!
//! A deployment topology compiler: resolves a declarative service topology
//! into an ordered provisioning plan and applies it against a provider.
//!
//! ## Overview
//!
//! Stackplan lets you:
//!
//! - Declare resources (networks, clusters, databases, services, ...) and
//!   their dependencies in a YAML file
//! - Preview exactly which resources will be created, updated or deleted
//! - Apply the plan in dependency order, resuming cleanly after a failure
//! - Re-apply an unchanged topology as a no-op
//!
//! ## Architecture
//!
//! 1. **Graph**: declarations become an acyclic [`graph::ResourceGraph`]
//! 2. **Diff**: each node is compared with the last-applied snapshot
//! 3. **Plan**: nodes are ordered topologically into plan steps
//! 4. **Apply**: steps run one at a time against a [`provider::Provider`]
//!
//! ## Modules
//!
//! - [`config`]: Topology parsing, validation and hashing
//! - [`graph`]: Resource graph construction
//! - [`planner`]: Diff, plan synthesis and application
//! - [`provider`]: Provider interface and adapters
//! - [`state`]: Snapshot storage backends (local, S3)
//! - [`orchestrator`]: Locked plan/apply runs
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: xray-tracing
//!   environment: dev
//!
//! resources:
//!   - id: net
//!     kind: network
//!   - id: db
//!     kind: database
//!     depends_on: [net]
//!   - id: task
//!     kind: task_definition
//!     wiring:
//!       - { property: rds_hostname, from: db, output: endpoint }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, TopologyConfig, TopologyHasher};
pub use error::{Result, StackplanError};
pub use graph::{GraphBuilder, ResourceGraph, ResourceNode};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use planner::{DiffEngine, PlanApplier, PlanSynthesizer, ProvisioningPlan};
pub use provider::{HttpProvider, LocalProvider, Provider, ProviderHandle};
pub use state::{LocalSnapshotStore, S3SnapshotStore, Snapshot, SnapshotStore};
