//! Backend built on the `notify` crate
//!
//! Owns one OS watcher plus the bookkeeping for every registered root.
//! Commands from caller threads are scheduled onto the run loop, which also
//! drains raw notifications, so the bookkeeping is only ever touched by the
//! watcher thread.

use crate::backend::Backend;
use crate::bridge::CallbackBridge;
use crate::error::{Result, WatchError};
use crate::event::ChangeType;
use crossbeam_channel::{
    at, bounded, never, select, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError,
};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Approximate size of one raw notification in an OS event buffer
const RAW_EVENT_FOOTPRINT: usize = 16;

/// Raw event buffer for platforms that don't expose it as an option
pub(crate) const DEFAULT_EVENT_BUFFER_SIZE: usize = 16 * 1024;

/// How reported paths relate to the registered ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathReporting {
    /// Case and symlinks as given at registration
    AsRegistered,
    /// Fully resolved paths
    Canonical,
}

#[derive(Debug, Clone)]
pub(crate) struct BackendOptions {
    /// Report all descendants, not only immediate children
    pub recursive: bool,
    pub path_reporting: PathReporting,
    /// Coalescing window, zero delivers immediately
    pub latency: Duration,
    /// Bound on how long a command may wait to be picked up by the loop
    pub command_timeout: Option<Duration>,
    pub event_buffer_size: usize,
}

impl BackendOptions {
    fn event_slots(&self) -> usize {
        (self.event_buffer_size / RAW_EVENT_FOOTPRINT).max(1)
    }

    fn recursive_mode(&self) -> RecursiveMode {
        if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }
}

enum Command {
    Register {
        paths: Vec<PathBuf>,
        reply: Sender<Result<()>>,
    },
    Unregister {
        paths: Vec<PathBuf>,
        reply: Sender<Result<bool>>,
    },
    StopMoved {
        paths: Vec<PathBuf>,
        reply: Sender<Result<Vec<PathBuf>>>,
    },
    Stop,
}

/// Everything the run loop takes ownership of when it starts
struct LoopState {
    watcher: RecommendedWatcher,
    commands: Receiver<Command>,
    raw_events: Receiver<notify::Result<Event>>,
}

pub(crate) struct NativeBackend {
    options: BackendOptions,
    commands: Sender<Command>,
    os_overflow: Arc<AtomicBool>,
    state: Mutex<Option<LoopState>>,
}

impl NativeBackend {
    /// Acquire the OS watcher; fails with `InsufficientResources` when the
    /// OS is out of watcher instances
    pub(crate) fn new(options: BackendOptions) -> Result<Self> {
        let (raw_tx, raw_events) = bounded(options.event_slots());
        let os_overflow = Arc::new(AtomicBool::new(false));

        let overflow_flag = Arc::clone(&os_overflow);
        let watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                if let Err(TrySendError::Full(_)) = raw_tx.try_send(result) {
                    overflow_flag.store(true, Ordering::SeqCst);
                }
            },
            notify::Config::default(),
        )
        .map_err(map_notify_error)?;

        let (commands, commands_rx) = unbounded();

        Ok(Self {
            options,
            commands,
            os_overflow,
            state: Mutex::new(Some(LoopState {
                watcher,
                commands: commands_rx,
                raw_events,
            })),
        })
    }

    /// Schedule a command on the run loop and wait for its result
    fn execute<T>(&self, build: impl FnOnce(Sender<Result<T>>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(build(reply_tx))
            .map_err(|_| WatchError::LoopStopped)?;

        match self.options.command_timeout {
            Some(timeout) => match reply_rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(WatchError::CommandTimeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => Err(WatchError::LoopStopped),
            },
            None => reply_rx.recv().map_err(|_| WatchError::LoopStopped)?,
        }
    }
}

impl Backend for NativeBackend {
    fn run_loop(&self, bridge: &CallbackBridge) -> Result<()> {
        let LoopState {
            watcher,
            commands,
            raw_events,
        } = self.state.lock().take().ok_or(WatchError::LoopStopped)?;

        let mut run_loop = RunLoop {
            options: self.options.clone(),
            watcher,
            roots: HashMap::new(),
            pending: Vec::new(),
            flush_at: None,
        };

        loop {
            let flush_timer = run_loop.flush_at.map(at).unwrap_or_else(never);

            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Register { paths, reply }) => {
                        send_reply("register", reply, run_loop.register_paths(&paths));
                    }
                    Ok(Command::Unregister { paths, reply }) => {
                        send_reply("unregister", reply, run_loop.unregister_paths(&paths));
                    }
                    Ok(Command::StopMoved { paths, reply }) => {
                        let dropped = run_loop.stop_watching_moved_paths(&paths);
                        send_reply("stop moved", reply, Ok(dropped));
                    }
                    Ok(Command::Stop) | Err(_) => break,
                },
                recv(raw_events) -> raw => match raw {
                    Ok(Ok(event)) => run_loop.handle_event(&event, bridge),
                    Ok(Err(err)) => bridge.report_failure(map_notify_error(err)),
                    Err(_) => {
                        return Err(WatchError::backend("OS notification source closed"));
                    }
                },
                recv(flush_timer) -> _ => run_loop.flush(bridge),
            }

            if self.os_overflow.swap(false, Ordering::SeqCst) {
                run_loop.discard_pending();
                bridge.report_overflow(None);
            }
        }

        run_loop.flush(bridge);
        debug!(
            "Watcher loop finished, releasing {} watch points",
            run_loop.roots.len()
        );
        Ok(())
    }

    fn register_paths(&self, paths: &[PathBuf]) -> Result<()> {
        self.execute(|reply| Command::Register {
            paths: paths.to_vec(),
            reply,
        })
    }

    fn unregister_paths(&self, paths: &[PathBuf]) -> Result<bool> {
        self.execute(|reply| Command::Unregister {
            paths: paths.to_vec(),
            reply,
        })
    }

    fn stop_watching_moved_paths(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        self.execute(|reply| Command::StopMoved {
            paths: paths.to_vec(),
            reply,
        })
    }

    fn request_stop(&self) -> Result<()> {
        self.commands
            .send(Command::Stop)
            .map_err(|_| WatchError::LoopStopped)
    }
}

/// Hand a command result back to its caller
///
/// The caller may have given up after a command timeout, in which case the
/// command has still taken effect.
fn send_reply<T>(command: &str, reply: Sender<Result<T>>, result: Result<T>) {
    if reply.send(result).is_err() {
        debug!(
            "Caller stopped waiting for {} command, result applied anyway",
            command
        );
    }
}

impl std::fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBackend")
            .field("options", &self.options)
            .finish()
    }
}

/// A registered root
struct WatchPoint {
    registered: PathBuf,
    canonical: PathBuf,
    identity: FileIdentity,
}

impl WatchPoint {
    fn relative<'a>(&self, raw: &'a Path) -> Option<&'a Path> {
        raw.strip_prefix(&self.registered)
            .or_else(|_| raw.strip_prefix(&self.canonical))
            .ok()
    }
}

struct RunLoop {
    options: BackendOptions,
    watcher: RecommendedWatcher,
    roots: HashMap<PathBuf, WatchPoint>,
    pending: Vec<Signal>,
    flush_at: Option<Instant>,
}

impl RunLoop {
    fn register_paths(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            if self.roots.contains_key(path) {
                return Err(WatchError::AlreadyWatching(path.clone()));
            }
            let identity = FileIdentity::of(path)?;
            self.watcher
                .watch(path, self.options.recursive_mode())
                .map_err(map_notify_error)?;

            let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            debug!("Watching {}", path.display());
            self.roots.insert(
                path.clone(),
                WatchPoint {
                    registered: path.clone(),
                    canonical,
                    identity,
                },
            );
        }
        Ok(())
    }

    fn unregister_paths(&mut self, paths: &[PathBuf]) -> Result<bool> {
        let mut success = true;
        for path in paths {
            if self.roots.remove(path).is_none() {
                info!("Path is not watched: {}", path.display());
                success = false;
                continue;
            }
            match self.watcher.unwatch(path) {
                Ok(()) => debug!("Stopped watching {}", path.display()),
                Err(err) => {
                    info!(
                        "Couldn't stop watching {} (probably because the directory was removed): {}",
                        path.display(),
                        err
                    );
                    success = false;
                }
            }
        }
        Ok(success)
    }

    fn stop_watching_moved_paths(&mut self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut dropped = Vec::new();
        for path in paths {
            let moved = match self.roots.get(path) {
                None => true,
                Some(point) => FileIdentity::of(path)
                    .map(|identity| identity != point.identity)
                    .unwrap_or(true),
            };
            if !moved {
                continue;
            }
            if self.roots.remove(path).is_some() {
                info!("Dropping moved watch root {}", path.display());
                if let Err(err) = self.watcher.unwatch(path) {
                    debug!("Unwatching moved root {} failed: {}", path.display(), err);
                }
            }
            dropped.push(path.clone());
        }
        dropped
    }

    fn handle_event(&mut self, event: &Event, bridge: &CallbackBridge) {
        for signal in classify(event) {
            match signal {
                Signal::Overflow(path) => {
                    let root = path.and_then(|path| self.owning_root(&path));
                    self.discard_pending();
                    bridge.report_overflow(root);
                }
                Signal::Change(kind, path) => match self.report_path(&path) {
                    Some(path) => self.emit(Signal::Change(kind, path), bridge),
                    None => debug!("Ignoring {} event for {}", kind, path.display()),
                },
                Signal::Unknown(path) => match self.report_path(&path) {
                    Some(path) => {
                        warn!("Unknown event for {}", path.display());
                        self.emit(Signal::Unknown(path), bridge);
                    }
                    None => debug!("Ignoring unknown event for {}", path.display()),
                },
            }
        }
    }

    /// The watch point with the longest prefix of `raw`
    fn find_root<'a>(&self, raw: &'a Path) -> Option<(&WatchPoint, &'a Path)> {
        self.roots
            .values()
            .filter_map(|point| point.relative(raw).map(|relative| (point, relative)))
            .max_by_key(|(point, _)| point.registered.as_os_str().len())
    }

    fn owning_root(&self, raw: &Path) -> Option<PathBuf> {
        self.find_root(raw)
            .map(|(point, _)| point.registered.clone())
    }

    /// Translate a raw path into the reported form, `None` if it is outside
    /// the watched depth
    fn report_path(&self, raw: &Path) -> Option<PathBuf> {
        let (point, relative) = self.find_root(raw)?;
        if !self.options.recursive && relative.components().count() > 1 {
            return None;
        }
        let base = match self.options.path_reporting {
            PathReporting::AsRegistered => &point.registered,
            PathReporting::Canonical => &point.canonical,
        };
        if relative.as_os_str().is_empty() {
            Some(base.clone())
        } else {
            Some(base.join(relative))
        }
    }

    fn emit(&mut self, signal: Signal, bridge: &CallbackBridge) {
        if self.options.latency.is_zero() {
            deliver(signal, bridge);
            return;
        }
        // Only collapse immediate repeats, anything else would reorder history
        if self.pending.last() != Some(&signal) {
            self.pending.push(signal);
        }
        if self.flush_at.is_none() {
            self.flush_at = Some(Instant::now() + self.options.latency);
        }
    }

    fn flush(&mut self, bridge: &CallbackBridge) {
        self.flush_at = None;
        for signal in self.pending.drain(..) {
            deliver(signal, bridge);
        }
    }

    fn discard_pending(&mut self) {
        self.flush_at = None;
        self.pending.clear();
    }
}

/// Backend-level view of a notification before path translation
#[derive(Debug, Clone, PartialEq, Eq)]
enum Signal {
    Change(ChangeType, PathBuf),
    Unknown(PathBuf),
    Overflow(Option<PathBuf>),
}

fn deliver(signal: Signal, bridge: &CallbackBridge) {
    match signal {
        Signal::Change(kind, path) => bridge.report_change(kind, path),
        Signal::Unknown(path) => bridge.report_unknown(path),
        Signal::Overflow(path) => bridge.report_overflow(path),
    }
}

fn classify(event: &Event) -> Vec<Signal> {
    if event.need_rescan() {
        return vec![Signal::Overflow(event.paths.first().cloned())];
    }

    let each = |kind: ChangeType| -> Vec<Signal> {
        event
            .paths
            .iter()
            .map(|path| Signal::Change(kind, path.clone()))
            .collect()
    };

    match &event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => each(ChangeType::Created),
        EventKind::Remove(_) => each(ChangeType::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(ChangeType::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(ChangeType::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event
            .paths
            .iter()
            .enumerate()
            .map(|(index, path)| {
                let kind = if index == 0 {
                    ChangeType::Removed
                } else {
                    ChangeType::Created
                };
                Signal::Change(kind, path.clone())
            })
            .collect(),
        // One side of a rename without a direction, decide by what's on disk
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                let kind = if path.symlink_metadata().is_ok() {
                    ChangeType::Created
                } else {
                    ChangeType::Removed
                };
                Signal::Change(kind, path.clone())
            })
            .collect(),
        EventKind::Modify(_) => each(ChangeType::Modified),
        EventKind::Other => each(ChangeType::Invalidated),
        EventKind::Any => event
            .paths
            .iter()
            .map(|path| Signal::Unknown(path.clone()))
            .collect(),
    }
}

/// Identity of a file system object, used to detect moved roots
#[cfg(unix)]
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
impl FileIdentity {
    fn of(path: &Path) -> std::io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = std::fs::symlink_metadata(path)?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }
}

#[cfg(not(unix))]
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileIdentity {
    canonical: PathBuf,
}

#[cfg(not(unix))]
impl FileIdentity {
    fn of(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            canonical: std::fs::canonicalize(path)?,
        })
    }
}

fn map_notify_error(err: notify::Error) -> WatchError {
    let exhausted = match &err.kind {
        notify::ErrorKind::MaxFilesWatch => Some("inotify watches limit too low"),
        notify::ErrorKind::Io(io) => resource_exhaustion(io),
        _ => None,
    };
    match exhausted {
        Some(message) => WatchError::InsufficientResources(message.to_string()),
        None => WatchError::backend(err),
    }
}

#[cfg(target_os = "linux")]
fn resource_exhaustion(err: &std::io::Error) -> Option<&'static str> {
    const EMFILE: i32 = 24;
    const ENOSPC: i32 = 28;

    match err.raw_os_error() {
        Some(EMFILE) => Some("inotify instance limit too low"),
        Some(ENOSPC) => Some("inotify watches limit too low"),
        _ => None,
    }
}

#[cfg(not(target_os = "linux"))]
fn resource_exhaustion(_err: &std::io::Error) -> Option<&'static str> {
    None
}
