//! Command line argument parsing for the annforge CLI using clap.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::build::config::IndexVariant;

/// annforge - builds, benchmarks and publishes ANN indexes
#[derive(Parser, Debug, Clone)]
#[command(name = "annforge")]
#[command(about = "Build, benchmark and publish approximate nearest neighbor indexes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct AnnforgeArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl AnnforgeArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build an index from an embedding matrix and publish it
    Build(BuildArgs),

    /// List published index artifacts in a directory
    List(ListArgs),

    /// Validate an index blob file
    Validate(ValidateArgs),
}

/// Arguments for building an index
#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    /// Path to the embedding matrix file (.json or raw binary)
    #[arg(long, value_name = "DATA_FILE")]
    pub data: PathBuf,

    /// Directory to publish the index into
    #[arg(long = "out-dir", value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Type of index to build
    #[arg(long = "index-type", default_value = "ivfpq")]
    pub index_type: IndexVariant,

    /// Build on the host thread even if multiple cores are available
    #[arg(long)]
    pub no_accel: bool,

    /// Neighbors per benchmark query
    #[arg(short = 'k', long = "top-k", default_value = "10")]
    pub top_k: usize,
}

/// Arguments for listing published artifacts
#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    /// Directory to search for published indexes
    #[arg(value_name = "DIRECTORY", default_value = ".")]
    pub directory: PathBuf,

    /// Show metadata details for each artifact
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for validating an index blob
#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    /// Path to the index file
    #[arg(value_name = "INDEX_FILE")]
    pub index_file: PathBuf,
}

/// Output formats for CLI
#[derive(ValueEnum, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
