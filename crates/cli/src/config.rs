//! Watcher configuration file
//!
//! A TOML file with a single `[watcher]` table. Every key is optional and
//! falls back to the engine defaults; command line flags override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub watcher: WatcherConfig,
}

/// Tunables for the watcher and its queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatcherConfig {
    /// Events held before the queue overflows (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long to wait for the watcher to start (default: 5000)
    #[serde(default = "default_timeout_ms")]
    pub start_timeout_ms: u64,

    /// macOS coalescing latency, 0 delivers immediately (default: 0)
    #[serde(default)]
    pub latency_ms: u64,

    /// Linux/Windows bound on path commands (default: 5000)
    #[serde(default = "default_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Windows raw event buffer in bytes (default: 65536)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_buffer_size() -> usize {
    filewatch::DEFAULT_BUFFER_SIZE
}

const MIN_BUFFER_SIZE: usize = 1024;

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            start_timeout_ms: default_timeout_ms(),
            latency_ms: 0,
            command_timeout_ms: default_timeout_ms(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity < filewatch::WatchQueue::MIN_CAPACITY {
            anyhow::bail!(
                "queue_capacity must be at least {}, got {}",
                filewatch::WatchQueue::MIN_CAPACITY,
                self.queue_capacity
            );
        }
        if self.start_timeout_ms == 0 {
            anyhow::bail!("start_timeout_ms must be greater than 0");
        }
        if self.command_timeout_ms == 0 {
            anyhow::bail!("command_timeout_ms must be greater than 0");
        }
        if self.buffer_size < MIN_BUFFER_SIZE {
            anyhow::bail!(
                "buffer_size must be at least {} bytes, got {}",
                MIN_BUFFER_SIZE,
                self.buffer_size
            );
        }
        Ok(())
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Apply command line values on top of the file
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(value) = overrides.queue_capacity {
            self.queue_capacity = value;
        }
        if let Some(value) = overrides.start_timeout_ms {
            self.start_timeout_ms = value;
        }
        if let Some(value) = overrides.latency_ms {
            self.latency_ms = value;
        }
        if let Some(value) = overrides.command_timeout_ms {
            self.command_timeout_ms = value;
        }
        if let Some(value) = overrides.buffer_size {
            self.buffer_size = value;
        }
    }
}

/// Values given on the command line; `None` keeps the file's value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub queue_capacity: Option<usize>,
    pub start_timeout_ms: Option<u64>,
    pub latency_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
    pub buffer_size: Option<usize>,
}

/// Parse configuration from TOML text
pub fn parse(text: &str) -> Result<FileConfig> {
    toml::from_str(text).context("Failed to parse config file")
}

/// Load the config file, or defaults when no path is given
pub fn load(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = parse(&text).with_context(|| format!("In {}", path.display()))?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Annotated configuration with every default spelled out
pub fn example_config() -> String {
    let defaults = WatcherConfig::default();
    format!(
        r#"# fwatch configuration
#
# Every key is optional; command line flags take precedence.

[watcher]
# Events held before the queue overflows and is cleared (minimum 2)
queue_capacity = {}

# Milliseconds to wait for the watcher thread to become ready
start_timeout_ms = {}

# macOS only: coalesce changes over this many milliseconds (0 = immediate)
latency_ms = {}

# Linux/Windows only: milliseconds a path command may wait for the watcher
command_timeout_ms = {}

# Windows only: raw notification buffer in bytes (minimum 1024)
buffer_size = {}
"#,
        defaults.queue_capacity,
        defaults.start_timeout_ms,
        defaults.latency_ms,
        defaults.command_timeout_ms,
        defaults.buffer_size,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.watcher, WatcherConfig::default());
        assert_eq!(config.watcher.queue_capacity, 1024);
        assert_eq!(config.watcher.buffer_size, 65536);
    }

    #[test]
    fn test_partial_table() {
        let config = parse("[watcher]\nqueue_capacity = 16\nlatency_ms = 25\n").unwrap();
        assert_eq!(config.watcher.queue_capacity, 16);
        assert_eq!(config.watcher.latency(), Duration::from_millis(25));
        assert_eq!(config.watcher.start_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(parse("[watcher]\nqueue_size = 16\n").is_err());
    }

    #[test]
    fn test_validation_ranges() {
        let mut config = WatcherConfig::default();
        assert!(config.validate().is_ok());

        config.queue_capacity = 1;
        assert!(config.validate().is_err());
        config.queue_capacity = 2;
        assert!(config.validate().is_ok());

        config.start_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.start_timeout_ms = 1;

        config.buffer_size = 512;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_win() {
        let mut config = parse("[watcher]\nqueue_capacity = 16\n").unwrap().watcher;
        config.apply(&Overrides {
            queue_capacity: Some(32),
            ..Overrides::default()
        });
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.command_timeout_ms, 5000);
    }

    #[test]
    fn test_example_parses_to_defaults() {
        let config = parse(&example_config()).unwrap();
        assert_eq!(config, FileConfig::default());
    }
}
