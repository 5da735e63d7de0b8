//! Per-platform watcher builders
//!
//! Each builder carries the semantics of one platform family (watch depth,
//! path reporting, tunables) and starts a [`Watcher`] on the `notify`
//! backend with those settings.

mod linux;
mod macos;
mod windows;

pub use linux::LinuxWatcherBuilder;
pub use macos::MacOsWatcherBuilder;
pub use windows::{WindowsWatcherBuilder, DEFAULT_BUFFER_SIZE};

use crate::backend::native::{BackendOptions, NativeBackend};
use crate::error::Result;
use crate::queue::WatchQueue;
use crate::watcher::Watcher;
use std::fmt;
use std::time::Duration;

/// Default bound on how long [`WatcherBuilder::start_default`] waits
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a path command waiting for the run loop
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Configures and starts a [`Watcher`]
pub trait WatcherBuilder {
    /// Start the watcher, waiting up to `timeout` for it to become ready
    fn start(&self, timeout: Duration) -> Result<Watcher>;

    fn start_default(&self) -> Result<Watcher> {
        self.start(DEFAULT_START_TIMEOUT)
    }
}

pub(crate) fn start_native(
    options: BackendOptions,
    queue: &WatchQueue,
    timeout: Duration,
) -> Result<Watcher> {
    tracing::debug!("Starting native watcher with {:?}", options);
    let backend = NativeBackend::new(options)?;
    Watcher::start(backend, queue, timeout)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    MacOs,
    Linux,
    Windows,
}

impl Platform {
    /// The platform this binary was built for, if supported
    pub fn current() -> Option<Platform> {
        if cfg!(target_os = "macos") {
            Some(Platform::MacOs)
        } else if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else if cfg!(windows) {
            Some(Platform::Windows)
        } else {
            None
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::MacOs => "macos",
            Platform::Linux => "linux",
            Platform::Windows => "windows",
        };
        f.write_str(name)
    }
}

/// Entry point selecting builder semantics by [`Platform`]
#[derive(Debug, Clone, Copy)]
pub struct FileEvents {
    platform: Platform,
}

impl FileEvents {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// A builder for this platform delivering into `queue`
    pub fn new_watcher(&self, queue: &WatchQueue) -> PlatformWatcherBuilder {
        match self.platform {
            Platform::MacOs => PlatformWatcherBuilder::MacOs(MacOsWatcherBuilder::new(queue)),
            Platform::Linux => PlatformWatcherBuilder::Linux(LinuxWatcherBuilder::new(queue)),
            Platform::Windows => {
                PlatformWatcherBuilder::Windows(WindowsWatcherBuilder::new(queue))
            }
        }
    }
}

/// Any of the platform builders
#[derive(Debug, Clone)]
pub enum PlatformWatcherBuilder {
    MacOs(MacOsWatcherBuilder),
    Linux(LinuxWatcherBuilder),
    Windows(WindowsWatcherBuilder),
}

impl WatcherBuilder for PlatformWatcherBuilder {
    fn start(&self, timeout: Duration) -> Result<Watcher> {
        match self {
            PlatformWatcherBuilder::MacOs(builder) => builder.start(timeout),
            PlatformWatcherBuilder::Linux(builder) => builder.start(timeout),
            PlatformWatcherBuilder::Windows(builder) => builder.start(timeout),
        }
    }
}
