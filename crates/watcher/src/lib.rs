//! File system change notifications behind one event stream
//!
//! This crate provides:
//! - A closed set of change events delivered through a bounded queue
//! - Overflow recovery (history is discarded, an overflow marker is queued)
//! - A watcher lifecycle owning one backend and its background thread
//! - Per-platform builders (macOS, Linux, Windows semantics)
//!
//! The caller configures a builder with a [`WatchQueue`], starts it, registers
//! paths on the returned [`Watcher`] and drains the queue from its own threads
//! until it observes [`ChangeEvent::Termination`].

pub mod backend;
pub mod bridge;
pub mod error;
pub mod event;
pub mod platform;
pub mod queue;
pub mod watcher;

// Re-exports
pub use backend::Backend;
pub use bridge::CallbackBridge;
pub use error::{Result, WatchError};
pub use event::{ChangeEvent, ChangeType, EventHandler, OverflowSource};
pub use platform::{
    FileEvents, LinuxWatcherBuilder, MacOsWatcherBuilder, Platform, PlatformWatcherBuilder,
    WatcherBuilder, WindowsWatcherBuilder, DEFAULT_BUFFER_SIZE, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_START_TIMEOUT,
};
pub use queue::WatchQueue;
pub use watcher::{Watcher, WatcherState};
