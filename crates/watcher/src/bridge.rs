//! Callback bridge from backend signals to the watch queue
//!
//! Every signal becomes exactly one queue operation. The notification thread
//! never blocks on a slow consumer: when the queue is full its history is
//! discarded and replaced by an overflow marker. Failures and termination
//! are re-queued right after that marker so they are never lost.

use crate::error::WatchError;
use crate::event::{ChangeEvent, ChangeType, OverflowSource};
use crate::queue::WatchQueue;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Sink handed to a [`Backend`](crate::Backend) run loop
///
/// Termination is not part of the backend-facing surface; the watcher
/// reports it once the run loop has returned.
pub struct CallbackBridge {
    queue: WatchQueue,
    terminated: AtomicBool,
}

impl CallbackBridge {
    pub(crate) fn new(queue: WatchQueue) -> Self {
        Self {
            queue,
            terminated: AtomicBool::new(false),
        }
    }

    pub fn report_change(&self, kind: ChangeType, path: PathBuf) {
        self.queue_event(ChangeEvent::Changed { kind, path });
    }

    pub fn report_unknown(&self, path: PathBuf) {
        self.queue_event(ChangeEvent::Unknown { path });
    }

    /// The operating system lost events for `path` (or for everything)
    pub fn report_overflow(&self, path: Option<PathBuf>) {
        if self.is_terminated() {
            debug!("Dropping overflow reported after termination");
            return;
        }
        self.signal_overflow(OverflowSource::OperatingSystem, path);
    }

    pub fn report_failure(&self, error: WatchError) {
        self.queue_event(ChangeEvent::Failure { error });
    }

    /// Queue the termination event; only the first call has any effect
    pub(crate) fn report_termination(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            warn!("Ignoring repeated termination signal");
            return;
        }
        self.offer_or_overflow(ChangeEvent::Termination);
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn queue_event(&self, event: ChangeEvent) {
        if self.is_terminated() {
            debug!("Dropping event reported after termination: {}", event);
            return;
        }
        self.offer_or_overflow(event);
    }

    fn offer_or_overflow(&self, event: ChangeEvent) {
        let event = match self.queue.offer(event) {
            Ok(()) => return,
            Err(event) => event,
        };

        info!("Event queue overflow, dropping all events");
        self.signal_overflow(OverflowSource::EventQueue, None);
        if event.is_terminal() {
            self.force_queue(event);
        }
    }

    fn signal_overflow(&self, source: OverflowSource, path: Option<PathBuf>) {
        let dropped = self.queue.clear();
        debug!("Cleared {} queued events on {} overflow", dropped, source);
        self.force_queue(ChangeEvent::Overflow { source, path });
    }

    /// Queue into space that a clear has just freed up
    ///
    /// Only fails when the queue is shared with another producer, which
    /// callers are not allowed to be. Never propagated into the backend.
    fn force_queue(&self, event: ChangeEvent) {
        if let Err(event) = self.queue.offer(event) {
            error!("Couldn't queue event: {}", event);
        }
    }
}

impl std::fmt::Debug for CallbackBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackBridge")
            .field("queue", &self.queue)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
