//! Lifecycle tests against a scripted in-memory backend

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use filewatch::{
    Backend, CallbackBridge, ChangeEvent, ChangeType, Result, WatchError, WatchQueue, Watcher,
    WatcherState,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
enum Init {
    Ready,
    Slow(Duration),
    OutOfResources,
}

#[derive(Clone, Copy)]
enum Exit {
    /// Run until a stop is requested
    OnStop,
    ReturnImmediately,
    FailImmediately,
    PanicImmediately,
}

/// Backend whose behavior is fixed up front and whose signals are fed by
/// the test through a channel
struct Scripted {
    init: Init,
    exit: Exit,
    registered: Mutex<HashSet<PathBuf>>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    feed: Receiver<(ChangeType, PathBuf)>,
}

impl Scripted {
    fn new(init: Init, exit: Exit) -> (Self, Sender<(ChangeType, PathBuf)>) {
        let (stop_tx, stop_rx) = bounded(1);
        let (feed_tx, feed) = unbounded();
        let backend = Self {
            init,
            exit,
            registered: Mutex::new(HashSet::new()),
            stop_tx,
            stop_rx,
            feed,
        };
        (backend, feed_tx)
    }
}

impl Backend for Scripted {
    fn initialize(&self) -> Result<()> {
        match self.init {
            Init::Ready => Ok(()),
            Init::Slow(delay) => {
                thread::sleep(delay);
                Ok(())
            }
            Init::OutOfResources => Err(WatchError::InsufficientResources(
                "inotify instance limit too low".to_string(),
            )),
        }
    }

    fn run_loop(&self, bridge: &CallbackBridge) -> Result<()> {
        match self.exit {
            Exit::ReturnImmediately => return Ok(()),
            Exit::FailImmediately => return Err(WatchError::backend("device vanished")),
            Exit::PanicImmediately => panic!("loop exploded"),
            Exit::OnStop => {}
        }
        loop {
            select! {
                recv(self.stop_rx) -> _ => return Ok(()),
                recv(self.feed) -> signal => match signal {
                    Ok((kind, path)) => bridge.report_change(kind, path),
                    Err(_) => {
                        let _ = self.stop_rx.recv();
                        return Ok(());
                    }
                },
            }
        }
    }

    fn register_paths(&self, paths: &[PathBuf]) -> Result<()> {
        let mut registered = self.registered.lock();
        for path in paths {
            if !registered.insert(path.clone()) {
                return Err(WatchError::AlreadyWatching(path.clone()));
            }
        }
        Ok(())
    }

    fn unregister_paths(&self, paths: &[PathBuf]) -> Result<bool> {
        let mut registered = self.registered.lock();
        let mut success = true;
        for path in paths {
            success &= registered.remove(path);
        }
        Ok(success)
    }

    fn stop_watching_moved_paths(&self, _paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    fn request_stop(&self) -> Result<()> {
        let _ = self.stop_tx.try_send(());
        Ok(())
    }
}

fn root(name: &str) -> PathBuf {
    std::env::temp_dir().join(name)
}

fn start(exit: Exit, capacity: usize) -> (Watcher, WatchQueue, Sender<(ChangeType, PathBuf)>) {
    let queue = WatchQueue::bounded(capacity).unwrap();
    let (backend, feed) = Scripted::new(Init::Ready, exit);
    let watcher = Watcher::start(backend, &queue, TIMEOUT).unwrap();
    (watcher, queue, feed)
}

/// Collect events up to and including termination
fn collect_until_termination(queue: &WatchQueue) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Some(event) = queue.poll(TIMEOUT) {
        let done = matches!(event, ChangeEvent::Termination);
        events.push(event);
        if done {
            break;
        }
    }
    events
}

#[test]
fn test_termination_is_last_and_unique() {
    let (watcher, queue, feed) = start(Exit::OnStop, 16);
    for i in 0..5 {
        feed.send((ChangeType::Modified, root(&format!("file-{}", i))))
            .unwrap();
    }

    let first = queue.poll(TIMEOUT).unwrap();
    assert!(matches!(
        first,
        ChangeEvent::Changed {
            kind: ChangeType::Modified,
            ..
        }
    ));

    watcher.shutdown().unwrap();
    assert!(watcher.await_termination(TIMEOUT));

    let events = collect_until_termination(&queue);
    assert!(matches!(events.last(), Some(ChangeEvent::Termination)));
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, ChangeEvent::Termination))
            .count(),
        1
    );
    assert!(queue.poll(Duration::from_millis(100)).is_none());
}

#[test]
fn test_flood_never_loses_termination() {
    let (watcher, queue, feed) = start(Exit::OnStop, 2);
    for i in 0..100 {
        feed.send((ChangeType::Created, root(&format!("burst-{}", i))))
            .unwrap();
    }
    drop(feed);

    watcher.shutdown().unwrap();
    assert!(watcher.await_termination(TIMEOUT));

    let events = queue.drain();
    assert!(!events.is_empty());
    assert!(events.len() <= 2);
    assert!(matches!(events.last(), Some(ChangeEvent::Termination)));
}

#[test]
fn test_operations_after_shutdown_are_illegal() {
    let (watcher, _queue, _feed) = start(Exit::OnStop, 8);
    watcher.shutdown().unwrap();

    let paths = [root("a")];
    assert!(matches!(
        watcher.start_watching(&paths),
        Err(WatchError::IllegalState {
            state: WatcherState::Closing,
            ..
        })
    ));
    assert!(matches!(
        watcher.stop_watching(&paths),
        Err(WatchError::IllegalState { .. })
    ));
    assert!(matches!(
        watcher.stop_watching_moved_paths(&paths),
        Err(WatchError::IllegalState { .. })
    ));
    assert!(matches!(
        watcher.shutdown(),
        Err(WatchError::IllegalState { .. })
    ));

    assert!(watcher.await_termination(TIMEOUT));
    assert!(matches!(
        watcher.start_watching(&paths),
        Err(WatchError::IllegalState {
            state: WatcherState::Closed,
            ..
        })
    ));
}

#[test]
fn test_unexpected_loop_exit_reports_failure_then_termination() {
    let (watcher, queue, _feed) = start(Exit::ReturnImmediately, 8);
    assert!(watcher.await_termination(TIMEOUT));

    let events = collect_until_termination(&queue);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        ChangeEvent::Failure {
            error: WatchError::LoopExitedUnexpectedly
        }
    ));
    assert!(matches!(&events[1], ChangeEvent::Termination));
}

#[test]
fn test_loop_error_is_delivered_as_failure() {
    let (watcher, queue, _feed) = start(Exit::FailImmediately, 8);
    assert!(watcher.await_termination(TIMEOUT));

    let events = collect_until_termination(&queue);
    assert_eq!(events.len(), 2);
    match &events[0] {
        ChangeEvent::Failure { error } => assert!(error.to_string().contains("device vanished")),
        other => panic!("expected failure, got {}", other),
    }
    assert!(matches!(&events[1], ChangeEvent::Termination));
}

#[test]
fn test_loop_panic_is_delivered_as_failure() {
    let (watcher, queue, _feed) = start(Exit::PanicImmediately, 8);
    assert!(watcher.await_termination(TIMEOUT));

    let events = collect_until_termination(&queue);
    assert_eq!(events.len(), 2);
    match &events[0] {
        ChangeEvent::Failure {
            error: WatchError::BackendPanicked(message),
        } => assert_eq!(message, "loop exploded"),
        other => panic!("expected panic failure, got {}", other),
    }
    assert!(matches!(&events[1], ChangeEvent::Termination));
}

#[test]
fn test_unexpected_exit_closes_watcher() {
    for exit in [Exit::ReturnImmediately, Exit::FailImmediately, Exit::PanicImmediately] {
        let (watcher, queue, _feed) = start(exit, 8);
        assert!(watcher.await_termination(TIMEOUT));
        assert_eq!(watcher.state(), WatcherState::Closed);

        assert!(matches!(
            watcher.start_watching(&[root("a")]),
            Err(WatchError::IllegalState {
                state: WatcherState::Closed,
                ..
            })
        ));
        assert!(matches!(
            watcher.stop_watching(&[root("a")]),
            Err(WatchError::IllegalState { .. })
        ));
        assert!(matches!(
            watcher.shutdown(),
            Err(WatchError::IllegalState { .. })
        ));

        let events = collect_until_termination(&queue);
        assert!(matches!(events.last(), Some(ChangeEvent::Termination)));
    }
}

#[test]
fn test_stop_watching_reports_unwatched_paths() {
    let (watcher, _queue, _feed) = start(Exit::OnStop, 8);
    let (a, b, c) = (root("a"), root("b"), root("c"));

    watcher.start_watching(&[a.clone(), b.clone()]).unwrap();
    assert!(!watcher.stop_watching(&[a.clone(), c]).unwrap());
    assert!(watcher.stop_watching(&[b]).unwrap());
    assert!(!watcher.stop_watching(&[a]).unwrap());

    watcher.shutdown().unwrap();
    assert!(watcher.await_termination(TIMEOUT));
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let (watcher, _queue, _feed) = start(Exit::OnStop, 8);
    watcher.start_watching(&[root("a")]).unwrap();

    let err = watcher.start_watching(&[root("a")]).unwrap_err();
    assert!(matches!(err, WatchError::AlreadyWatching(path) if path == root("a")));

    watcher.shutdown().unwrap();
    assert!(watcher.await_termination(TIMEOUT));
}

#[test]
fn test_start_timeout() {
    let queue = WatchQueue::bounded(8).unwrap();
    let (backend, _feed) = Scripted::new(Init::Slow(Duration::from_millis(500)), Exit::OnStop);

    let err = Watcher::start(backend, &queue, Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, WatchError::StartTimeout(_)));
}

#[test]
fn test_insufficient_resources_surface_from_start() {
    let queue = WatchQueue::bounded(8).unwrap();
    let (backend, _feed) = Scripted::new(Init::OutOfResources, Exit::OnStop);

    let err = Watcher::start(backend, &queue, TIMEOUT).unwrap_err();
    assert!(err.is_insufficient_resources());
    assert!(queue.is_empty());
}

#[test]
fn test_await_termination_from_many_threads() {
    let (watcher, _queue, _feed) = start(Exit::OnStop, 8);
    let watcher = Arc::new(watcher);

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let watcher = Arc::clone(&watcher);
            thread::spawn(move || watcher.await_termination(TIMEOUT))
        })
        .collect();

    assert!(!watcher.await_termination(Duration::from_millis(20)));
    watcher.shutdown().unwrap();

    for waiter in waiters {
        assert!(waiter.join().unwrap());
    }
    assert_eq!(watcher.state(), WatcherState::Closed);
}

#[test]
fn test_relative_paths_rejected_before_backend() {
    let (watcher, _queue, _feed) = start(Exit::OnStop, 8);

    let err = watcher
        .start_watching(&[root("a"), PathBuf::from("relative")])
        .unwrap_err();
    assert!(matches!(err, WatchError::NotAbsolute(_)));
    // Nothing from the batch reached the backend
    assert!(!watcher.stop_watching(&[root("a")]).unwrap());

    watcher.shutdown().unwrap();
    assert!(watcher.await_termination(TIMEOUT));
}
