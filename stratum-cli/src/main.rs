//! Stratum CLI - load units and inspect their dependency graph

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "stratum")]
#[command(about = "Dependency-driven unit loader", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base path searched for bare unit ids, in order
    #[arg(short, long = "path", global = true)]
    paths: Vec<String>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load units and print their exports
    Load {
        /// Unit ids forming the initial batch
        #[arg(required = true)]
        ids: Vec<String>,

        /// Pretty-print JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Load units and print the dependency graph
    Graph {
        /// Unit ids forming the initial batch
        #[arg(required = true)]
        ids: Vec<String>,

        /// Print the graph as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = config::load_config(cli.config, cli.paths)?;

    let succeeded = match cli.command {
        Commands::Load { ids, pretty } => {
            commands::load::run(config.loader, &ids, pretty || config.output.pretty)?
        }
        Commands::Graph { ids, json } => commands::graph::run(config.loader, &ids, json)?,
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
