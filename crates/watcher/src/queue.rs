//! Bounded hand-off queue between the watcher thread and its consumers

use crate::error::{Result, WatchError};
use crate::event::ChangeEvent;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::time::Duration;

/// Fixed-capacity FIFO of [`ChangeEvent`]s
///
/// Cloning is cheap and every clone refers to the same queue, so it can be
/// drained from any number of threads. Only the engine appends to it.
#[derive(Clone)]
pub struct WatchQueue {
    tx: Sender<ChangeEvent>,
    rx: Receiver<ChangeEvent>,
    capacity: usize,
}

impl WatchQueue {
    /// Smallest capacity that can hold an overflow marker followed by a
    /// failure or termination event
    pub const MIN_CAPACITY: usize = 2;

    /// Create a queue holding at most `capacity` events
    pub fn bounded(capacity: usize) -> Result<Self> {
        if capacity < Self::MIN_CAPACITY {
            return Err(WatchError::InvalidQueueCapacity(capacity));
        }
        let (tx, rx) = bounded(capacity);
        Ok(Self { tx, rx, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Block until an event is available
    ///
    /// The queue keeps its own sender alive, so this only returns `None` if
    /// the channel is torn down underneath it.
    pub fn take(&self) -> Option<ChangeEvent> {
        self.rx.recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn poll(&self, timeout: Duration) -> Option<ChangeEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Take the next event if one is ready
    pub fn try_take(&self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Take every event that is currently queued
    pub fn drain(&self) -> Vec<ChangeEvent> {
        self.rx.try_iter().collect()
    }

    /// Non-blocking enqueue; hands the event back when the queue is full
    pub(crate) fn offer(&self, event: ChangeEvent) -> std::result::Result<(), ChangeEvent> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) | Err(TrySendError::Disconnected(event)) => Err(event),
        }
    }

    /// Discard everything queued, returning how many events were dropped
    pub(crate) fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }
}

impl std::fmt::Debug for WatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
