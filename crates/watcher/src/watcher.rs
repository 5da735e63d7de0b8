//! Watcher lifecycle
//!
//! A [`Watcher`] owns one backend and the thread running its loop:
//!
//! ```text
//! Created -> Starting -> Watching -> Closing -> Closed
//! ```
//!
//! Path commands are only accepted while `Watching`. Once the loop exits,
//! for whatever reason, exactly one `Termination` event is queued. A loop
//! that exits without a shutdown request moves the watcher straight to
//! `Closed`.

use crate::backend::Backend;
use crate::bridge::CallbackBridge;
use crate::error::{Result, WatchError};
use crate::queue::WatchQueue;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const THREAD_NAME: &str = "File watcher server";

/// Lifecycle state of a [`Watcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatcherState {
    Created,
    Starting,
    Watching,
    Closing,
    Closed,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatcherState::Created => "created",
            WatcherState::Starting => "starting",
            WatcherState::Watching => "watching",
            WatcherState::Closing => "closing",
            WatcherState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State visible to both the owner and the watcher thread
struct Shared {
    state: Mutex<WatcherState>,
    terminated: Mutex<bool>,
    terminated_cv: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(WatcherState::Created),
            terminated: Mutex::new(false),
            terminated_cv: Condvar::new(),
        }
    }

    fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    fn set_state(&self, state: WatcherState) {
        *self.state.lock() = state;
    }

    fn stop_requested(&self) -> bool {
        matches!(self.state(), WatcherState::Closing | WatcherState::Closed)
    }

    /// Close a watcher whose loop ended on its own
    fn close_after_exit(&self) {
        let mut state = self.state.lock();
        if matches!(*state, WatcherState::Starting | WatcherState::Watching) {
            *state = WatcherState::Closed;
        }
    }

    fn mark_terminated(&self) {
        *self.terminated.lock() = true;
        self.terminated_cv.notify_all();
    }
}

/// A running file watcher
///
/// Obtained from a [`WatcherBuilder`](crate::WatcherBuilder) or directly from
/// [`Watcher::start`] with a custom [`Backend`]. All methods take `&self` and
/// can be called from any thread.
pub struct Watcher {
    backend: Arc<dyn Backend>,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
    /// Run `backend` on a new thread and wait up to `timeout` for it to
    /// become ready
    ///
    /// Events are delivered into `queue`. On [`WatchError::StartTimeout`] the
    /// backend's resources are left as they are: a backend that becomes ready
    /// later never enters its loop, one that is stuck stays stuck. Discard the
    /// queue along with it.
    pub fn start<B: Backend>(backend: B, queue: &WatchQueue, timeout: Duration) -> Result<Self> {
        let backend: Arc<dyn Backend> = Arc::new(backend);
        let shared = Arc::new(Shared::new());
        shared.set_state(WatcherState::Starting);

        let (ready_tx, ready_rx) = bounded(1);
        let bridge = CallbackBridge::new(queue.clone());
        let handle = thread::Builder::new().name(THREAD_NAME.to_string()).spawn({
            let backend = Arc::clone(&backend);
            let shared = Arc::clone(&shared);
            move || serve(backend, bridge, shared, ready_tx)
        })?;

        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(())) => {
                {
                    // The loop may already have ended on its own
                    let mut state = shared.state.lock();
                    if *state == WatcherState::Starting {
                        *state = WatcherState::Watching;
                    }
                }
                debug!("File watcher started");
                Ok(Self {
                    backend,
                    shared,
                    thread: Mutex::new(Some(handle)),
                })
            }
            Ok(Err(err)) => {
                shared.set_state(WatcherState::Closed);
                if handle.join().is_err() {
                    warn!("Watcher thread panicked after failed start");
                }
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread checks for this once its backend becomes ready
                warn!("Watcher did not start within {:?}", timeout);
                shared.set_state(WatcherState::Closed);
                Err(WatchError::StartTimeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                shared.set_state(WatcherState::Closed);
                Err(WatchError::LoopExitedUnexpectedly)
            }
        }
    }

    pub fn state(&self) -> WatcherState {
        self.shared.state()
    }

    /// Start watching the given absolute paths
    ///
    /// Stops at the first path that fails; earlier paths in the batch stay
    /// registered.
    pub fn start_watching(&self, paths: &[PathBuf]) -> Result<()> {
        self.ensure_watching("start watching")?;
        ensure_absolute(paths)?;
        debug!("Registering {} paths", paths.len());
        self.backend.register_paths(paths)
    }

    /// Stop watching the given paths
    ///
    /// Returns `true` only if every path was being watched.
    pub fn stop_watching(&self, paths: &[PathBuf]) -> Result<bool> {
        self.ensure_watching("stop watching")?;
        ensure_absolute(paths)?;
        debug!("Unregistering {} paths", paths.len());
        self.backend.unregister_paths(paths)
    }

    /// Stop watching any of `paths` whose file system identity changed since
    /// they were registered, returning those that are no longer watched
    pub fn stop_watching_moved_paths(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        self.ensure_watching("stop watching moved paths")?;
        ensure_absolute(paths)?;
        self.backend.stop_watching_moved_paths(paths)
    }

    /// Request the loop to stop without waiting for it
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if *state != WatcherState::Watching {
                return Err(WatchError::IllegalState {
                    operation: "shut down",
                    state: *state,
                });
            }
            *state = WatcherState::Closing;
        }

        info!("Shutting down file watcher");
        match self.backend.request_stop() {
            Ok(()) => Ok(()),
            Err(WatchError::LoopStopped) => {
                debug!("Watcher loop already stopped");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Wait up to `timeout` for the loop to exit
    ///
    /// Returns `true` once the thread has finished and the `Termination`
    /// event is queued. Safe to call from several threads at once.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        {
            let mut terminated = self.shared.terminated.lock();
            match Instant::now().checked_add(timeout) {
                Some(deadline) => {
                    while !*terminated {
                        if self
                            .shared
                            .terminated_cv
                            .wait_until(&mut terminated, deadline)
                            .timed_out()
                        {
                            break;
                        }
                    }
                }
                None => {
                    while !*terminated {
                        self.shared.terminated_cv.wait(&mut terminated);
                    }
                }
            }
            if !*terminated {
                return false;
            }
        }

        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("Watcher thread panicked");
            }
        }

        let mut state = self.shared.state.lock();
        if *state == WatcherState::Closing {
            *state = WatcherState::Closed;
        }
        true
    }

    fn ensure_watching(&self, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state != WatcherState::Watching {
            return Err(WatchError::IllegalState { operation, state });
        }
        Ok(())
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if *state != WatcherState::Watching {
            return;
        }
        *state = WatcherState::Closing;
        drop(state);

        warn!("Watcher dropped while watching, stopping it");
        if let Err(err) = self.backend.request_stop() {
            debug!("Stop request on drop failed: {}", err);
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn ensure_absolute(paths: &[PathBuf]) -> Result<()> {
    match paths.iter().find(|path| !path.is_absolute()) {
        Some(path) => Err(WatchError::NotAbsolute(path.clone())),
        None => Ok(()),
    }
}

/// Body of the watcher thread
fn serve(
    backend: Arc<dyn Backend>,
    bridge: CallbackBridge,
    shared: Arc<Shared>,
    ready: Sender<Result<()>>,
) {
    let initialized = panic::catch_unwind(AssertUnwindSafe(|| backend.initialize()))
        .unwrap_or_else(|payload| Err(WatchError::BackendPanicked(panic_message(&*payload))));

    if initialized.is_err() {
        let _ = ready.send(initialized);
        shared.mark_terminated();
        return;
    }
    if ready.send(Ok(())).is_err() || shared.state() == WatcherState::Closed {
        debug!("Starter gave up waiting, not entering the watcher loop");
        shared.mark_terminated();
        return;
    }
    drop(ready);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.run_loop(&bridge)));
    let failure = match outcome {
        Ok(Ok(())) if shared.stop_requested() => {
            debug!("Watcher loop finished");
            None
        }
        Ok(Ok(())) => {
            warn!("Watcher loop exited without a shutdown request");
            Some(WatchError::LoopExitedUnexpectedly)
        }
        Ok(Err(err)) => {
            error!("Watcher loop failed: {}", err);
            Some(err)
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            error!("Watcher loop panicked: {}", message);
            Some(WatchError::BackendPanicked(message))
        }
    };

    let failed = failure.is_some();
    if let Some(err) = failure {
        bridge.report_failure(err);
    }
    bridge.report_termination();
    if failed {
        shared.close_after_exit();
    }
    shared.mark_terminated();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
