use crate::backend::native::{BackendOptions, PathReporting, DEFAULT_EVENT_BUFFER_SIZE};
use crate::error::Result;
use crate::platform::{start_native, WatcherBuilder, DEFAULT_COMMAND_TIMEOUT};
use crate::queue::WatchQueue;
use crate::watcher::Watcher;
use std::time::Duration;

/// inotify semantics: each root and its immediate children only
///
/// Exhausting the instance or watch limits surfaces as
/// [`WatchError::InsufficientResources`](crate::WatchError::InsufficientResources).
#[derive(Debug, Clone)]
pub struct LinuxWatcherBuilder {
    queue: WatchQueue,
    command_timeout: Duration,
}

impl LinuxWatcherBuilder {
    pub fn new(queue: &WatchQueue) -> Self {
        Self {
            queue: queue.clone(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn options(&self) -> BackendOptions {
        BackendOptions {
            recursive: false,
            path_reporting: PathReporting::AsRegistered,
            latency: Duration::ZERO,
            command_timeout: Some(self.command_timeout),
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl WatcherBuilder for LinuxWatcherBuilder {
    fn start(&self, timeout: Duration) -> Result<Watcher> {
        start_native(self.options(), &self.queue, timeout)
    }
}
