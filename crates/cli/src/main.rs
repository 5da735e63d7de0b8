//! fwatch - stream file system changes to the terminal

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod cmd;

/// fwatch - Watch directories and print every change
#[derive(Parser)]
#[command(name = "fwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch directories until interrupted
    Watch(cmd::watch::WatchArgs),
    /// Show the effective configuration
    Config {
        /// Config file to load
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print an annotated example config instead
        #[arg(long)]
        example: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `--json` output stays machine readable
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Watch(args) => cmd::watch::run(args).await,
        Commands::Config { config, example } => {
            if example {
                cmd::config::run_example().await
            } else {
                cmd::config::run_show(config.as_deref()).await
            }
        }
    }
}
