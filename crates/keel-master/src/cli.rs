//! Command line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Keel: volume placement for a replicated blob store master.
#[derive(Parser)]
#[command(name = "keel-master")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Grow volumes on the configured cluster.
    Grow(GrowArgs),
    /// Print the configured topology with its free capacity.
    Topology(TopologyArgs),
    /// Print version information.
    Version,
}

/// Arguments for the grow command.
#[derive(Args)]
pub struct GrowArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Replica placement, e.g. "001". Defaults to the configured replication.
    #[arg(short, long)]
    pub replication: Option<String>,

    /// Collection the new volumes belong to.
    #[arg(long, default_value = "")]
    pub collection: String,

    /// Volume TTL, e.g. "3d". Defaults to the configured TTL.
    #[arg(long)]
    pub ttl: Option<String>,

    /// Number of volumes to grow. Defaults to the batch size for the copy count.
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Preferred data center for the main replica.
    #[arg(long)]
    pub data_center: Option<String>,

    /// Preferred rack for the main replica.
    #[arg(long)]
    pub rack: Option<String>,

    /// Preferred data node for the main replica.
    #[arg(long)]
    pub data_node: Option<String>,

    /// Select and record placements without contacting storage nodes.
    #[arg(long)]
    pub dry_run: bool,

    /// Output format (text, json).
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the topology command.
#[derive(Args)]
pub struct TopologyArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format (text, json).
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for CLI commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
