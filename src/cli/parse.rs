//! CLI parse: clap types for obsgraph. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Obsgraph CLI - observer contexts over an object graph
#[derive(Parser)]
#[command(name = "obsgraph")]
#[command(about = "Export, store and re-import observer context trees")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (holds config/ overrides)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Snapshot store directory (overrides storage.snapshot_path)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a demo graph, export it and save it as a snapshot
    Demo {
        /// Snapshot name
        name: String,
        /// Number of subjects in the root context
        #[arg(long, default_value = "3")]
        subjects: usize,
        /// Add a nested context owning its own subjects
        #[arg(long)]
        nested: bool,
    },
    /// List stored snapshots
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the relational table of a snapshot
    Inspect {
        name: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Import a snapshot into a fresh manager and show the rebuilt tree
    Import {
        name: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Delete a snapshot
    Remove { name: String },
}
