//! CLI command definitions for the `owlflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Run and inspect workflow definitions.
#[derive(Parser)]
#[command(name = "owlflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.owlflow/config.toml).
    #[arg(long, global = true, env = "OWLFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow file and wait for it to finish.
    Run {
        /// Path to a JSON or YAML workflow definition.
        file: PathBuf,

        /// Input object as JSON (e.g. '{"name": "Bob"}').
        #[arg(long)]
        input: Option<String>,

        /// Trigger label recorded on the execution.
        #[arg(long, default_value = "manual")]
        trigger: String,

        /// User id recorded on the execution.
        #[arg(long, default_value = "local")]
        user: String,

        /// Print progress events while the run is in flight.
        #[arg(long)]
        watch: bool,
    },

    /// Parse and validate a workflow file.
    Validate {
        /// Path to a JSON or YAML workflow definition.
        file: PathBuf,
    },

    /// Re-serialize a workflow file as JSON or YAML.
    Convert {
        /// Path to a JSON or YAML workflow definition.
        file: PathBuf,

        /// Output format.
        #[arg(long, value_enum)]
        to: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}
