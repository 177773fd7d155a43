//! Start, monitor and stop a real watcher process

use serial_test::serial;
use std::fs;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use warden::descriptor::Descriptor;
use warden::supervisor::{EventKind, State};

use super::helpers::{is_running, marking_descriptor, supervisor, wait_until, RecordingGuard};

#[test]
#[serial]
fn test_runnable_descriptor_becomes_alive() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let guard = Arc::new(RecordingGuard::default());
    let sup = supervisor(&temp.path().join("svc"), marking_descriptor(&marker), guard.clone());

    sup.start().unwrap();
    assert!(
        wait_until(Duration::from_secs(20), || guard.saw_alive()),
        "never became alive: {:?}",
        guard.states()
    );
    assert!(wait_until(Duration::from_secs(5), || marker.exists()));

    let pid = sup.pid();
    assert_ne!(pid, 0);
    assert!(is_running(pid));

    // Keeps getting PINGED while the process runs
    assert!(wait_until(Duration::from_secs(10), || {
        guard.states().contains(&State::Pinged)
    }));

    sup.close().unwrap();
}

#[test]
#[serial]
fn test_close_stops_watcher_and_process() {
    let temp = TempDir::new().unwrap();
    let pid_file = temp.path().join("child.pid");
    let descriptor = Descriptor::new(format!(
        "echo $$ > '{}'\nexec sleep 120",
        pid_file.display()
    ))
    .unwrap();
    let guard = Arc::new(RecordingGuard::default());
    let dir = temp.path().join("svc");
    let sup = supervisor(&dir, descriptor, guard.clone());

    sup.start().unwrap();
    assert!(wait_until(Duration::from_secs(20), || guard.saw_alive()));
    let watcher_pid = sup.pid();
    let child_pid: u32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();

    sup.close().unwrap();

    let states = guard.states();
    assert!(states.ends_with(&[State::Stopping, State::Stopped]), "{states:?}");
    assert!(!guard.last().unwrap().is_alive());
    assert!(!dir.join("lock").exists());
    assert!(wait_until(Duration::from_secs(20), || !is_running(watcher_pid)));
    assert!(wait_until(Duration::from_secs(20), || !is_running(child_pid)));

    let history = sup.history();
    assert!(history.iter().any(|e| e.kind == EventKind::Quit));
    assert_eq!(sup.pid(), 0);
}

#[test]
#[serial]
fn test_status_command_reports_alive_watcher() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let guard = Arc::new(RecordingGuard::default());
    let dir = temp.path().join("svc");
    let sup = supervisor(&dir, marking_descriptor(&marker), guard.clone());

    sup.start().unwrap();
    assert!(wait_until(Duration::from_secs(20), || guard.saw_alive()));

    let output = Command::new(env!("CARGO_BIN_EXE_warden"))
        .arg("status")
        .arg(&dir)
        .env("NO_COLOR", "1")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("ALIVE"), "{stdout}");
    assert!(stdout.contains(&sup.pid().to_string()), "{stdout}");

    sup.close().unwrap();
}

#[test]
#[serial]
fn test_stop_command_ends_watcher() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let guard = Arc::new(RecordingGuard::default());
    let dir = temp.path().join("svc");
    let sup = supervisor(&dir, marking_descriptor(&marker), guard.clone());

    sup.start().unwrap();
    assert!(wait_until(Duration::from_secs(20), || guard.saw_alive()));
    let watcher_pid = sup.pid();
    sup.set_detach_on_close(true);
    sup.close().unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_warden"))
        .arg("stop")
        .arg(&dir)
        .status()
        .unwrap();

    assert!(status.success());
    assert!(wait_until(Duration::from_secs(20), || !is_running(watcher_pid)));
    assert!(!dir.join("lock").exists());
}
