//! Change events delivered through the watch queue

use crate::error::WatchError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Type of change reported for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// An item with the given path has been created
    Created,
    /// An item with the given path has been removed
    Removed,
    /// An item with the given path has been modified
    Modified,
    /// Some undisclosed change happened under the given path,
    /// all information about descendants must be discarded
    Invalidated,
}

/// Where an overflow originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverflowSource {
    /// The operating system dropped events (kernel or backend buffer)
    OperatingSystem,
    /// The watch queue was full and has been cleared
    EventQueue,
}

/// A single notification taken from a [`WatchQueue`](crate::WatchQueue)
///
/// Events are immutable once constructed. `Termination` is always the last
/// event delivered for a watcher.
#[derive(Debug)]
pub enum ChangeEvent {
    /// A path was created, removed, modified or invalidated
    Changed { kind: ChangeType, path: PathBuf },
    /// Something happened at `path` or below, no details available
    Unknown { path: PathBuf },
    /// Event history was lost; everything under `path` (or everything, when
    /// absent) must be considered changed
    Overflow {
        source: OverflowSource,
        path: Option<PathBuf>,
    },
    /// An error surfaced after the watcher started
    Failure { error: WatchError },
    /// The background loop has exited
    Termination,
}

/// Receives one callback per event variant
///
/// Consumers that prefer callbacks over matching implement this and call
/// [`ChangeEvent::apply`].
pub trait EventHandler {
    fn handle_change(&mut self, kind: ChangeType, path: &Path);

    fn handle_unknown(&mut self, path: &Path);

    fn handle_overflow(&mut self, source: OverflowSource, path: Option<&Path>);

    fn handle_failure(&mut self, error: &WatchError);

    fn handle_termination(&mut self);
}

impl ChangeEvent {
    /// Dispatch this event to the matching handler method
    pub fn apply<H: EventHandler + ?Sized>(&self, handler: &mut H) {
        match self {
            ChangeEvent::Changed { kind, path } => handler.handle_change(*kind, path),
            ChangeEvent::Unknown { path } => handler.handle_unknown(path),
            ChangeEvent::Overflow { source, path } => {
                handler.handle_overflow(*source, path.as_deref())
            }
            ChangeEvent::Failure { error } => handler.handle_failure(error),
            ChangeEvent::Termination => handler.handle_termination(),
        }
    }

    /// Whether this event must survive a queue overflow
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChangeEvent::Failure { .. } | ChangeEvent::Termination
        )
    }

    /// The path this event refers to, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ChangeEvent::Changed { path, .. } | ChangeEvent::Unknown { path } => Some(path),
            ChangeEvent::Overflow { path, .. } => path.as_deref(),
            ChangeEvent::Failure { .. } | ChangeEvent::Termination => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeType::Created => "CREATED",
            ChangeType::Removed => "REMOVED",
            ChangeType::Modified => "MODIFIED",
            ChangeType::Invalidated => "INVALIDATED",
        };
        f.write_str(name)
    }
}

impl fmt::Display for OverflowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowSource::OperatingSystem => f.write_str("OPERATING_SYSTEM"),
            OverflowSource::EventQueue => f.write_str("EVENT_QUEUE"),
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEvent::Changed { kind, path } => write!(f, "{} {}", kind, path.display()),
            ChangeEvent::Unknown { path } => write!(f, "UNKNOWN {}", path.display()),
            ChangeEvent::Overflow { source, path: Some(path) } => {
                write!(f, "OVERFLOW ({}) at {}", source, path.display())
            }
            ChangeEvent::Overflow { source, path: None } => write!(f, "OVERFLOW ({})", source),
            ChangeEvent::Failure { error } => write!(f, "FAILURE {}", error),
            ChangeEvent::Termination => f.write_str("TERMINATE"),
        }
    }
}
