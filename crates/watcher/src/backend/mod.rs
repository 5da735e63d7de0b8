//! Backend contract consumed by the watcher lifecycle
//!
//! A backend wraps an OS notification facility. The watcher runs its loop on
//! a dedicated thread and forwards path commands to it from caller threads.

pub(crate) mod native;

use crate::bridge::CallbackBridge;
use crate::error::Result;
use std::path::PathBuf;

/// An OS-specific change detection engine
///
/// Command methods (`register_paths`, `unregister_paths`,
/// `stop_watching_moved_paths`, `request_stop`) are called from caller
/// threads while `run_loop` is executing and must be safe to do so.
pub trait Backend: Send + Sync + 'static {
    /// Prepare the run loop on the watcher thread
    ///
    /// The watcher reports readiness to the starter once this returns `Ok`.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Block delivering signals through `bridge` until a stop is requested
    ///
    /// Returning without a prior [`request_stop`](Backend::request_stop) is
    /// reported to consumers as an unexpected exit. Termination is reported by
    /// the watcher once this returns, never by the backend itself.
    fn run_loop(&self, bridge: &CallbackBridge) -> Result<()>;

    /// Start watching absolute `paths`
    fn register_paths(&self, paths: &[PathBuf]) -> Result<()>;

    /// Stop watching `paths`; `false` unless every path was being watched
    fn unregister_paths(&self, paths: &[PathBuf]) -> Result<bool>;

    /// Stop watching any of `paths` that moved since registration, returning
    /// the ones that are no longer watched
    fn stop_watching_moved_paths(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>>;

    /// Ask the run loop to exit; must not wait for it
    fn request_stop(&self) -> Result<()>;
}
