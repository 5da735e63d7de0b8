//! Error types for file watching

use crate::watcher::WatcherState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors raised synchronously by the engine, or delivered as
/// [`ChangeEvent::Failure`](crate::ChangeEvent::Failure) once watching
#[derive(Debug, Error)]
pub enum WatchError {
    /// The backend did not signal readiness in time. Its resources are in an
    /// undefined state and the watcher must be discarded.
    #[error("starting the watcher timed out after {0:?}")]
    StartTimeout(Duration),

    /// The OS refused to provide enough watch resources (e.g. inotify limits)
    #[error("insufficient resources for watching: {0}")]
    InsufficientResources(String),

    /// Operation invoked in the wrong lifecycle state
    #[error("cannot {operation} while watcher is {state}")]
    IllegalState {
        operation: &'static str,
        state: WatcherState,
    },

    /// The watch queue must hold at least an overflow marker plus one more event
    #[error("watch queue capacity must be at least 2, got {0}")]
    InvalidQueueCapacity(usize),

    /// A command was not picked up by the run loop in time
    ///
    /// The command stays scheduled and may still take effect later, so a
    /// retried registration can fail with `AlreadyWatching`.
    #[error("execution timed out after {0:?}")]
    CommandTimeout(Duration),

    #[error("already watching path: {}", .0.display())]
    AlreadyWatching(PathBuf),

    #[error("path is not absolute: {}", .0.display())]
    NotAbsolute(PathBuf),

    /// The run loop returned without a prior shutdown request
    #[error("watcher loop exited unexpectedly")]
    LoopExitedUnexpectedly,

    #[error("watcher loop panicked: {0}")]
    BackendPanicked(String),

    /// A command was sent to a run loop that is no longer running
    #[error("watcher loop is not running")]
    LoopStopped,

    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Wrap an arbitrary backend error
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        WatchError::Backend(err.into())
    }

    /// Whether the caller may retry after freeing resources
    pub fn is_insufficient_resources(&self) -> bool {
        matches!(self, WatchError::InsufficientResources(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_state_message() {
        let err = WatchError::IllegalState {
            operation: "start watching",
            state: WatcherState::Closing,
        };
        assert_eq!(err.to_string(), "cannot start watching while watcher is closing");
    }

    #[test]
    fn test_backend_error_keeps_source() {
        use std::error::Error as _;

        let err = WatchError::backend(std::io::Error::new(
            std::io::ErrorKind::Other,
            "poll failed",
        ));
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "backend error: poll failed");
    }
}
