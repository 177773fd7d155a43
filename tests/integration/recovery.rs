//! Recovery from failing status checks, lost watchers, misbehaving guards and
//! interrupted launches

use serial_test::serial;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use warden::descriptor::Descriptor;
use warden::fs::WorkDir;
use warden::process::kill_group;
use warden::supervisor::{EventKind, Guard, State, Supervisor};

use super::helpers::{
    fast_config, is_running, line_count, marking_descriptor, supervisor, wait_until,
    RecordingGuard,
};

/// True once `guard` reported PINGED after its first `skip` reports
fn pinged_after(guard: &RecordingGuard, skip: usize) -> bool {
    guard
        .states()
        .get(skip..)
        .is_some_and(|later| later.contains(&State::Pinged))
}

#[test]
#[serial]
fn test_failing_status_abandons_and_relaunches() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let flag = temp.path().join("unhealthy");
    let dir = temp.path().join("svc");
    let descriptor = marking_descriptor(&marker)
        .with_status_script(format!("test ! -f '{}'", flag.display()));
    let guard = Arc::new(RecordingGuard::default());
    let sup = supervisor(&dir, descriptor, guard.clone());

    sup.start().unwrap();
    assert!(wait_until(Duration::from_secs(20), || guard.saw_alive()));
    let old_pid = sup.pid();
    let seen = guard.states().len();

    // Status turns bad: the liveness window runs out and the watcher is replaced
    fs::write(&flag, "").unwrap();
    assert!(
        wait_until(Duration::from_secs(40), || line_count(&marker) >= 2),
        "no relaunch: {:?}",
        guard.states()
    );
    assert!(wait_until(Duration::from_secs(20), || !is_running(old_pid)));

    fs::remove_file(&flag).unwrap();
    assert!(wait_until(Duration::from_secs(40), || pinged_after(&guard, seen)));

    let new_pid = sup.pid();
    assert_ne!(new_pid, 0);
    assert_ne!(new_pid, old_pid);

    // The old watcher was quit, not just dropped
    assert!(guard.states()[seen..].contains(&State::Stopping));

    sup.close().unwrap();
}

#[test]
#[serial]
fn test_removed_lock_relaunches_watcher() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let dir = temp.path().join("svc");
    let guard = Arc::new(RecordingGuard::default());
    let sup = supervisor(&dir, marking_descriptor(&marker), guard.clone());

    sup.start().unwrap();
    assert!(wait_until(Duration::from_secs(20), || guard.saw_alive()));
    let old_pid = sup.pid();
    let seen = guard.states().len();

    fs::remove_file(dir.join("lock")).unwrap();

    assert!(wait_until(Duration::from_secs(40), || pinged_after(&guard, seen)));
    assert_ne!(sup.pid(), old_pid);
    assert!(guard.states()[seen..].contains(&State::Failed));
    assert!(sup
        .history()
        .iter()
        .any(|e| e.kind == EventKind::Lost && e.detail.contains("lock file removed")));

    // The superseded watcher notices its lock is gone and stops
    assert!(wait_until(Duration::from_secs(20), || !is_running(old_pid)));
    assert_eq!(line_count(&marker), 2);

    sup.close().unwrap();
}

#[test]
#[serial]
fn test_killed_watcher_is_replaced() {
    let temp = TempDir::new().unwrap();
    let pids = temp.path().join("child.pids");
    let dir = temp.path().join("svc");
    let descriptor = Descriptor::new(format!(
        "echo $$ >> '{}'\nexec sleep 120",
        pids.display()
    ))
    .unwrap();
    let guard = Arc::new(RecordingGuard::default());
    let sup = supervisor(&dir, descriptor, guard.clone());

    sup.start().unwrap();
    assert!(wait_until(Duration::from_secs(20), || guard.saw_alive()));
    let old_pid = sup.pid();
    let seen = guard.states().len();

    // The watcher leads its own session, so this leaves its child running
    kill_group(old_pid);

    assert!(wait_until(Duration::from_secs(60), || pinged_after(&guard, seen)));
    let new_pid = sup.pid();
    assert_ne!(new_pid, 0);
    assert_ne!(new_pid, old_pid);
    assert_eq!(line_count(&pids), 2);

    sup.close().unwrap();

    // Only the orphan of the killed watcher is left to clean up
    for pid in fs::read_to_string(&pids).unwrap().lines() {
        kill_group(pid.trim().parse().unwrap());
    }
}

/// Fails some reports and panics on others
struct UnreliableGuard {
    inner: RecordingGuard,
}

impl Guard for UnreliableGuard {
    fn report_state(&self, state: State) -> anyhow::Result<()> {
        self.inner.report_state(state)?;
        match state {
            State::Starting => panic!("guard blew up on STARTING"),
            State::Started => anyhow::bail!("guard refused STARTED"),
            _ => Ok(()),
        }
    }
}

#[test]
#[serial]
fn test_guard_failures_do_not_stop_supervision() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let guard = Arc::new(UnreliableGuard {
        inner: RecordingGuard::default(),
    });
    let work_dir = WorkDir::create(temp.path().join("svc")).unwrap();
    let sup = Supervisor::new(
        work_dir,
        marking_descriptor(&marker),
        guard.clone(),
        fast_config(),
    );

    sup.start().unwrap();
    assert!(
        wait_until(Duration::from_secs(30), || guard
            .inner
            .states()
            .contains(&State::Pinged)),
        "{:?}",
        guard.inner.states()
    );

    let history = sup.history();
    let errors: Vec<&str> = history
        .iter()
        .filter(|e| e.kind == EventKind::Error)
        .map(|e| e.detail.as_str())
        .collect();
    assert!(errors.iter().any(|d| d.contains("guard panicked")), "{errors:?}");
    assert!(errors.iter().any(|d| d.contains("guard rejected")), "{errors:?}");
    assert_eq!(line_count(&marker), 1, "guard failures caused a relaunch");

    sup.close().unwrap();
}

/// Watcher program that takes a while before it publishes its lock
fn slow_watcher(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("slow-warden");
    fs::write(
        &path,
        format!(
            "#!/bin/sh\nsleep 2\nexec '{}' \"$@\"\n",
            env!("CARGO_BIN_EXE_warden")
        ),
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[test]
#[serial]
fn test_close_during_launch_stops_late_watcher() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let dir = temp.path().join("svc");
    let guard = Arc::new(RecordingGuard::default());
    let config = fast_config().with_watcher_program(slow_watcher(temp.path()));
    let sup = Supervisor::new(
        WorkDir::create(&dir).unwrap(),
        marking_descriptor(&marker),
        guard.clone(),
        config,
    );

    sup.start().unwrap();
    assert!(wait_until(Duration::from_secs(10), || sup
        .history()
        .iter()
        .any(|e| e.kind == EventKind::Finished)));

    // LAUNCH has returned but the watcher has not published yet
    sup.close().unwrap();

    let history = sup.history();
    let late = history
        .iter()
        .find(|e| e.kind == EventKind::Attach && e.detail.starts_with("late watcher"))
        .expect("closing did not wait for the launched watcher");
    assert!(history
        .iter()
        .any(|e| e.kind == EventKind::Quit && e.detail == "watcher acknowledged"));
    assert!(!dir.join("lock").exists());
    assert!(wait_until(Duration::from_secs(20), || !is_running(late.pid)));
}
