use crate::backend::native::{BackendOptions, PathReporting};
use crate::error::Result;
use crate::platform::{start_native, WatcherBuilder, DEFAULT_COMMAND_TIMEOUT};
use crate::queue::WatchQueue;
use crate::watcher::Watcher;
use std::time::Duration;

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// ReadDirectoryChangesW semantics: whole subtrees, canonical paths
///
/// The buffer size does not size the ReadDirectoryChangesW buffer itself,
/// which `notify` keeps internal. It bounds the backend's raw notification
/// channel instead (one slot per 16 bytes): once that many notifications
/// pile up undrained an operating system overflow is reported. Deleting a
/// file may show up as `Modified` followed by `Removed`.
#[derive(Debug, Clone)]
pub struct WindowsWatcherBuilder {
    queue: WatchQueue,
    buffer_size: usize,
    command_timeout: Duration,
}

impl WindowsWatcherBuilder {
    pub fn new(queue: &WatchQueue) -> Self {
        Self {
            queue: queue.clone(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn options(&self) -> BackendOptions {
        BackendOptions {
            recursive: true,
            path_reporting: PathReporting::Canonical,
            latency: Duration::ZERO,
            command_timeout: Some(self.command_timeout),
            event_buffer_size: self.buffer_size,
        }
    }
}

impl WatcherBuilder for WindowsWatcherBuilder {
    fn start(&self, timeout: Duration) -> Result<Watcher> {
        start_native(self.options(), &self.queue, timeout)
    }
}
