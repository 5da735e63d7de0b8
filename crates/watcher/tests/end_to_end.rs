//! Real file system round trips through the platform builder for this host

use filewatch::{
    ChangeEvent, ChangeType, FileEvents, Platform, WatchQueue, WatcherBuilder, WatcherState,
};
use std::path::Path;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_for_change(queue: &WatchQueue, kind: ChangeType, expected: &Path) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match queue.poll(remaining) {
            Some(ChangeEvent::Changed { kind: seen, path }) if seen == kind && path == expected => {
                return true
            }
            Some(ChangeEvent::Termination) | None => return false,
            Some(_) => continue,
        }
    }
    false
}

#[test]
fn test_created_file_is_reported_then_terminates() {
    let Some(platform) = Platform::current() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();

    let queue = WatchQueue::bounded(16).unwrap();
    let watcher = FileEvents::new(platform)
        .new_watcher(&queue)
        .start(TIMEOUT)
        .unwrap();
    watcher.start_watching(&[root.clone()]).unwrap();

    let file = root.join("created.txt");
    std::fs::write(&file, b"hello").unwrap();
    assert!(wait_for_change(&queue, ChangeType::Created, &file));

    watcher.shutdown().unwrap();
    assert!(watcher.await_termination(TIMEOUT));
    assert_eq!(watcher.state(), WatcherState::Closed);

    let mut last = None;
    while let Some(event) = queue.try_take() {
        last = Some(event);
    }
    assert!(matches!(last, Some(ChangeEvent::Termination)));
}

#[test]
fn test_stop_watching_unknown_root_returns_false() {
    let Some(platform) = Platform::current() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();

    let queue = WatchQueue::bounded(16).unwrap();
    let watcher = FileEvents::new(platform)
        .new_watcher(&queue)
        .start_default()
        .unwrap();

    watcher.start_watching(&[root.clone()]).unwrap();
    assert!(!watcher
        .stop_watching(&[root.clone(), root.join("never-registered")])
        .unwrap());
    assert!(!watcher.stop_watching(&[root]).unwrap());

    watcher.shutdown().unwrap();
    assert!(watcher.await_termination(TIMEOUT));
}

// Windows keeps watched directories locked against renames
#[cfg(unix)]
#[test]
fn test_moved_root_is_dropped() {
    let Some(platform) = Platform::current() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().canonicalize().unwrap();
    let kept = base.join("kept");
    let moved = base.join("moved");
    std::fs::create_dir(&kept).unwrap();
    std::fs::create_dir(&moved).unwrap();

    let queue = WatchQueue::bounded(64).unwrap();
    let watcher = FileEvents::new(platform)
        .new_watcher(&queue)
        .start(TIMEOUT)
        .unwrap();
    watcher
        .start_watching(&[kept.clone(), moved.clone()])
        .unwrap();

    std::fs::rename(&moved, base.join("elsewhere")).unwrap();
    std::fs::create_dir(&moved).unwrap();

    let dropped = watcher
        .stop_watching_moved_paths(&[kept.clone(), moved.clone()])
        .unwrap();
    assert_eq!(dropped, vec![moved]);
    assert!(watcher.stop_watching(&[kept]).unwrap());

    watcher.shutdown().unwrap();
    assert!(watcher.await_termination(TIMEOUT));
}
