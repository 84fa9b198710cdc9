//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stackplan - ordered, idempotent provisioning of declarative topologies.
#[derive(Parser, Debug)]
#[command(name = "stackplan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the topology file.
    #[arg(short, long, global = true, env = "STACKPLAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "STACKPLAN_LOG_JSON")]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter topology file.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the topology file.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show resources in dependency order.
    Graph,

    /// Show the provisioning plan without applying it.
    Plan {
        /// Show field-level differences.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Apply the provisioning plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete every resource recorded in the snapshot.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage the snapshot store.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// Snapshot management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the last-applied snapshot.
    Show,

    /// Lock the snapshot.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the snapshot.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Release whatever lock is held.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply_with_globals() {
        let cli = Cli::try_parse_from([
            "stackplan",
            "apply",
            "--yes",
            "--config",
            "infra/stackplan.yaml",
            "--output",
            "json",
        ])
        .expect("parse");

        assert!(matches!(cli.command, Commands::Apply { yes: true }));
        assert_eq!(cli.config, Some(PathBuf::from("infra/stackplan.yaml")));
        assert_eq!(cli.output, OutputFormat::Json);
    }

    #[test]
    fn test_parse_state_unlock() {
        let cli = Cli::try_parse_from(["stackplan", "state", "unlock", "--force"]).expect("parse");

        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::Unlock {
                    lock_id: None,
                    force: true
                }
            }
        ));
    }

    #[test]
    fn test_unknown_output_format_is_rejected() {
        assert!(Cli::try_parse_from(["stackplan", "plan", "--output", "yaml"]).is_err());
    }
}
