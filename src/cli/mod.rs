//! CLI module for the stackplan tool.
//!
//! This module provides the command-line interface for planning and applying
//! topologies.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
