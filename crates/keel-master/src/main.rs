//! Keel master: grows replicated volumes across data centers, racks and data nodes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use keel_core::{Config, LogFormat};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Grow(args) => {
            let config = load_config(&args.config)?;
            init_logging(&config)?;
            commands::handle_grow(&config, args).await
        }
        Commands::Topology(args) => {
            let config = load_config(&args.config)?;
            init_logging(&config)?;
            commands::handle_topology(&config, &args)
        }
        Commands::Version => {
            println!("keel-master {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    Config::load(path.as_deref()).context("Failed to load configuration")
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }

    Ok(())
}
