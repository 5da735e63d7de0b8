//! Watch directories and print changes until interrupted

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use filewatch::{
    ChangeType, EventHandler, FileEvents, OverflowSource, Platform, PlatformWatcherBuilder,
    WatchError, WatchQueue, WatcherBuilder,
};
use fwatch_cli::config::{self, Overrides, WatcherConfig};
use owo_colors::OwoColorize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Directories to watch
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Config file to load
    #[arg(long)]
    config: Option<PathBuf>,

    /// Events held before the queue overflows
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Milliseconds to wait for the watcher to start
    #[arg(long)]
    start_timeout_ms: Option<u64>,

    /// macOS coalescing latency in milliseconds
    #[arg(long)]
    latency_ms: Option<u64>,

    /// Linux/Windows path command timeout in milliseconds
    #[arg(long)]
    command_timeout_ms: Option<u64>,

    /// Windows raw event buffer in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Watcher semantics to use (default: this host)
    #[arg(long, value_enum)]
    platform: Option<PlatformArg>,

    /// Print one JSON object per event
    #[arg(long)]
    json: bool,
}

impl WatchArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            queue_capacity: self.queue_capacity,
            start_timeout_ms: self.start_timeout_ms,
            latency_ms: self.latency_ms,
            command_timeout_ms: self.command_timeout_ms,
            buffer_size: self.buffer_size,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlatformArg {
    Macos,
    Linux,
    Windows,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Macos => Platform::MacOs,
            PlatformArg::Linux => Platform::Linux,
            PlatformArg::Windows => Platform::Windows,
        }
    }
}

pub async fn run(args: WatchArgs) -> Result<()> {
    // 1. Resolve configuration
    let mut file = config::load(args.config.as_deref())?;
    file.watcher.apply(&args.overrides());
    let settings = file.watcher;
    settings.validate().context("Invalid configuration")?;

    let platform = match args.platform {
        Some(arg) => arg.into(),
        None => Platform::current().context("Unsupported platform, pass --platform")?,
    };

    let roots = args
        .paths
        .iter()
        .map(|path| {
            std::fs::canonicalize(path)
                .with_context(|| format!("Cannot watch {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    // 2. Start the watcher
    let queue = WatchQueue::bounded(settings.queue_capacity)?;
    let builder = configure(FileEvents::new(platform).new_watcher(&queue), &settings);
    let watcher = builder
        .start(settings.start_timeout())
        .map_err(|err| match err {
            WatchError::InsufficientResources(_) => {
                anyhow::Error::new(err).context("Raise the OS watch limits and try again")
            }
            other => anyhow::Error::new(other).context("Failed to start watcher"),
        })?;
    let watcher = Arc::new(watcher);
    watcher
        .start_watching(&roots)
        .context("Failed to register paths")?;

    if !args.json {
        println!(
            "{} {} path(s) with {} semantics {}",
            "Watching".bold(),
            roots.len(),
            platform.cyan(),
            "(Ctrl-C to stop)".dimmed()
        );
        for root in &roots {
            println!("  {}", root.display().cyan());
        }
        println!();
    }

    // 3. Print events until termination or Ctrl-C
    let json = args.json;
    let mut drain = tokio::task::spawn_blocking({
        let queue = queue.clone();
        move || drain_events(&queue, json)
    });

    let summary = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, shutting down watcher");
            if let Err(err) = watcher.shutdown() {
                warn!("Shutdown request failed: {}", err);
            }
            (&mut drain).await.context("Event printer panicked")?
        }
        joined = &mut drain => joined.context("Event printer panicked")?,
    };

    // 4. Wait for the watcher thread
    let start_timeout = settings.start_timeout();
    let terminated = tokio::task::spawn_blocking({
        let watcher = Arc::clone(&watcher);
        move || watcher.await_termination(start_timeout)
    })
    .await?;
    if !terminated {
        warn!("Watcher did not terminate within {:?}", start_timeout);
    }

    if !json {
        println!();
        println!(
            "{} {} changes, {} unknown, {} overflows, {} failures",
            "Summary:".bold(),
            summary.changes,
            summary.unknown,
            summary.overflows,
            summary.failures
        );
    }

    if summary.failures > 0 {
        anyhow::bail!("Watcher reported {} failure(s)", summary.failures);
    }
    Ok(())
}

fn configure(builder: PlatformWatcherBuilder, settings: &WatcherConfig) -> PlatformWatcherBuilder {
    match builder {
        PlatformWatcherBuilder::MacOs(builder) => {
            PlatformWatcherBuilder::MacOs(builder.with_latency(settings.latency()))
        }
        PlatformWatcherBuilder::Linux(builder) => {
            PlatformWatcherBuilder::Linux(builder.with_command_timeout(settings.command_timeout()))
        }
        PlatformWatcherBuilder::Windows(builder) => PlatformWatcherBuilder::Windows(
            builder
                .with_buffer_size(settings.buffer_size)
                .with_command_timeout(settings.command_timeout()),
        ),
    }
}

#[derive(Debug, Default)]
struct Summary {
    changes: usize,
    unknown: usize,
    overflows: usize,
    failures: usize,
}

/// Prints each event as it is dispatched
struct Printer {
    json: bool,
    summary: Summary,
    terminated: bool,
}

impl EventHandler for Printer {
    fn handle_change(&mut self, kind: ChangeType, path: &Path) {
        self.summary.changes += 1;
        if self.json {
            println!(
                "{}",
                json!({ "type": "change", "kind": kind.to_string(), "path": path })
            );
            return;
        }
        let label = format!("{:<11}", kind.to_string());
        let label = match kind {
            ChangeType::Created => label.green().to_string(),
            ChangeType::Removed => label.red().to_string(),
            ChangeType::Modified => label.yellow().to_string(),
            ChangeType::Invalidated => label.magenta().to_string(),
        };
        println!("{} {}", label, path.display());
    }

    fn handle_unknown(&mut self, path: &Path) {
        self.summary.unknown += 1;
        if self.json {
            println!("{}", json!({ "type": "unknown", "path": path }));
        } else {
            println!("{} {}", format!("{:<11}", "UNKNOWN").dimmed(), path.display());
        }
    }

    fn handle_overflow(&mut self, source: OverflowSource, path: Option<&Path>) {
        self.summary.overflows += 1;
        if self.json {
            println!(
                "{}",
                json!({ "type": "overflow", "source": source.to_string(), "path": path })
            );
            return;
        }
        let scope = path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "all paths".to_string());
        println!(
            "{} {} {}",
            format!("{:<11}", "OVERFLOW").yellow().bold(),
            scope,
            format!("({}, rescan needed)", source).dimmed()
        );
    }

    fn handle_failure(&mut self, error: &WatchError) {
        self.summary.failures += 1;
        if self.json {
            println!(
                "{}",
                json!({ "type": "failure", "message": error.to_string() })
            );
        } else {
            println!("{} {}", format!("{:<11}", "FAILURE").red().bold(), error);
        }
    }

    fn handle_termination(&mut self) {
        self.terminated = true;
        if self.json {
            println!("{}", json!({ "type": "termination" }));
        } else {
            println!("{}", "Watcher terminated".dimmed());
        }
    }
}

fn drain_events(queue: &WatchQueue, json: bool) -> Summary {
    let mut printer = Printer {
        json,
        summary: Summary::default(),
        terminated: false,
    };
    while !printer.terminated {
        match queue.take() {
            Some(event) => event.apply(&mut printer),
            None => break,
        }
    }
    printer.summary
}
