//! Configuration display command

use anyhow::{Context, Result};
use fwatch_cli::config;
use owo_colors::OwoColorize;
use std::path::Path;

/// Print the effective configuration
pub async fn run_show(path: Option<&Path>) -> Result<()> {
    let file = config::load(path)?;
    let watcher = &file.watcher;
    watcher.validate().context("Invalid configuration")?;

    println!("{}", "Watcher Configuration".bold());
    match path {
        Some(path) => println!("{}: {}\n", "Location".dimmed(), path.display().dimmed()),
        None => println!("{}\n", "(built-in defaults)".dimmed()),
    }

    println!("{}", "[watcher]".yellow());
    println!("  {} = {}", "queue_capacity".cyan(), watcher.queue_capacity);
    println!(
        "  {} = {} {}",
        "start_timeout_ms".cyan(),
        watcher.start_timeout_ms,
        format!("({:?})", watcher.start_timeout()).dimmed()
    );
    println!(
        "  {} = {} {}",
        "latency_ms".cyan(),
        watcher.latency_ms,
        if watcher.latency_ms == 0 {
            "(immediate)".dimmed().to_string()
        } else {
            format!("({:?})", watcher.latency()).dimmed().to_string()
        }
    );
    println!(
        "  {} = {} {}",
        "command_timeout_ms".cyan(),
        watcher.command_timeout_ms,
        format!("({:?})", watcher.command_timeout()).dimmed()
    );
    println!(
        "  {} = {} {}",
        "buffer_size".cyan(),
        watcher.buffer_size,
        format!("({} KiB)", watcher.buffer_size / 1024).dimmed()
    );

    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    println!("{}", config::example_config());
    Ok(())
}
