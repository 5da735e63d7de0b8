use crate::backend::native::{BackendOptions, PathReporting, DEFAULT_EVENT_BUFFER_SIZE};
use crate::error::Result;
use crate::platform::{start_native, WatcherBuilder};
use crate::queue::WatchQueue;
use crate::watcher::Watcher;
use std::time::Duration;

/// FSEvents semantics: whole subtrees, paths as registered, optional
/// coalescing latency
#[derive(Debug, Clone)]
pub struct MacOsWatcherBuilder {
    queue: WatchQueue,
    latency: Duration,
}

impl MacOsWatcherBuilder {
    pub fn new(queue: &WatchQueue) -> Self {
        Self {
            queue: queue.clone(),
            latency: Duration::ZERO,
        }
    }

    /// Coalesce changes over `latency` before delivering them
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    fn options(&self) -> BackendOptions {
        BackendOptions {
            recursive: true,
            path_reporting: PathReporting::AsRegistered,
            latency: self.latency,
            command_timeout: None,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl WatcherBuilder for MacOsWatcherBuilder {
    fn start(&self, timeout: Duration) -> Result<Watcher> {
        start_native(self.options(), &self.queue, timeout)
    }
}
