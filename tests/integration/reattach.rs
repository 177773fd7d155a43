//! Watchers outliving their supervisor

use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use warden::descriptor::Descriptor;
use warden::supervisor::State;

use super::helpers::{is_running, line_count, marking_descriptor, supervisor, wait_until, RecordingGuard};

#[test]
#[serial]
fn test_detached_watcher_is_reattached() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let dir = temp.path().join("svc");

    let first_guard = Arc::new(RecordingGuard::default());
    let first = supervisor(&dir, marking_descriptor(&marker), first_guard.clone());
    first.start().unwrap();
    assert!(wait_until(Duration::from_secs(20), || first_guard.saw_alive()));
    let pid = first.pid();

    first.set_detach_on_close(true);
    first.close().unwrap();

    // Detaching reports nothing further and leaves the watcher running
    assert!(first_guard.last().unwrap().is_alive());
    assert!(is_running(pid));
    assert!(dir.join("lock").exists());

    let second_guard = Arc::new(RecordingGuard::default());
    let second = supervisor(&dir, marking_descriptor(&marker), second_guard.clone());
    second.start().unwrap();
    assert!(wait_until(Duration::from_secs(20), || second_guard.saw_alive()));

    assert_eq!(second.pid(), pid);
    assert!(!second_guard.states().contains(&State::Starting));
    assert_eq!(line_count(&marker), 1, "process was started twice");

    second.close().unwrap();
    assert!(wait_until(Duration::from_secs(20), || !is_running(pid)));
}

#[test]
#[serial]
fn test_changed_descriptor_restarts_watcher() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let dir = temp.path().join("svc");

    let first_guard = Arc::new(RecordingGuard::default());
    let first = supervisor(&dir, marking_descriptor(&marker), first_guard.clone());
    first.start().unwrap();
    assert!(wait_until(Duration::from_secs(20), || first_guard.saw_alive()));
    let old_pid = first.pid();
    first.set_detach_on_close(true);
    first.close().unwrap();

    let changed = Descriptor::new(format!("echo changed >> '{}'\nexec sleep 120", marker.display()))
        .unwrap()
        .with_description("changed");
    let second_guard = Arc::new(RecordingGuard::default());
    let second = supervisor(&dir, changed, second_guard.clone());
    second.start().unwrap();
    assert!(wait_until(Duration::from_secs(30), || second_guard.saw_alive()));

    let new_pid = second.pid();
    assert_ne!(new_pid, 0);
    assert_ne!(new_pid, old_pid);
    assert!(wait_until(Duration::from_secs(20), || !is_running(old_pid)));
    assert_eq!(line_count(&marker), 2);

    second.close().unwrap();
}
