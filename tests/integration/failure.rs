//! Launch failures, shared directories and abandoned watchers

use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use warden::descriptor::Descriptor;
use warden::supervisor::State;

use super::helpers::{is_running, line_count, marking_descriptor, supervisor, wait_until, RecordingGuard};

#[test]
#[serial]
fn test_failing_start_backs_off_linearly() {
    let temp = TempDir::new().unwrap();
    let guard = Arc::new(RecordingGuard::default());
    let sup = supervisor(
        &temp.path().join("svc"),
        Descriptor::new("exit 1").unwrap(),
        guard.clone(),
    );

    let start = Instant::now();
    sup.start().unwrap();
    thread::sleep(Duration::from_secs(15));
    sup.close().unwrap();

    let failed: Vec<Instant> = guard
        .times_of(State::Failed)
        .into_iter()
        .filter(|t| t.duration_since(start) <= Duration::from_secs(15))
        .collect();
    assert!(failed.len() > 3, "only {} FAILED reports", failed.len());
    assert!(!guard.saw_alive());

    let gaps: Vec<Duration> = failed.windows(2).map(|w| w[1] - w[0]).collect();
    for pair in gaps.windows(2) {
        assert!(pair[1] > pair[0], "gaps not increasing: {gaps:?}");
    }
}

#[test]
#[serial]
fn test_two_supervisors_share_one_watcher() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let dir = temp.path().join("svc");

    let guard_a = Arc::new(RecordingGuard::default());
    let guard_b = Arc::new(RecordingGuard::default());
    let a = supervisor(&dir, marking_descriptor(&marker), guard_a.clone());
    let b = supervisor(&dir, marking_descriptor(&marker), guard_b.clone());

    a.start().unwrap();
    b.start().unwrap();
    assert!(wait_until(Duration::from_secs(30), || {
        guard_a.saw_alive() && guard_b.saw_alive()
    }));

    assert_ne!(a.pid(), 0);
    assert_eq!(a.pid(), b.pid());
    assert_eq!(line_count(&marker), 1, "process was started twice");

    let pid = a.pid();
    b.set_detach_on_close(true);
    b.close().unwrap();
    a.close().unwrap();
    assert!(wait_until(Duration::from_secs(20), || !is_running(pid)));
}

#[test]
#[serial]
fn test_unattended_watcher_stops_itself() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let dir = temp.path().join("svc");
    let guard = Arc::new(RecordingGuard::default());
    let sup = supervisor(&dir, marking_descriptor(&marker), guard.clone());

    sup.set_unattended(3);
    sup.start().unwrap();
    assert!(wait_until(Duration::from_secs(20), || guard.saw_alive()));
    let pid = sup.pid();

    // Leave without telling the watcher
    sup.set_detach_on_close(true);
    sup.close().unwrap();
    assert!(is_running(pid));

    assert!(
        wait_until(Duration::from_secs(25), || !dir.join("lock").exists()),
        "lock file outlived the unattended window"
    );
    assert!(wait_until(Duration::from_secs(10), || !is_running(pid)));
}
