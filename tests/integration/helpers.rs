//! Shared helpers for supervision integration tests

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use warden::descriptor::Descriptor;
use warden::fs::WorkDir;
use warden::process::is_process_alive;
use warden::supervisor::{Guard, State, Supervisor, SupervisorConfig};

/// Guard that keeps every reported state with the time it arrived
#[derive(Default)]
pub struct RecordingGuard {
    reports: Mutex<Vec<(Instant, State)>>,
}

impl Guard for RecordingGuard {
    fn report_state(&self, state: State) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push((Instant::now(), state));
        Ok(())
    }
}

impl RecordingGuard {
    pub fn states(&self) -> Vec<State> {
        self.reports.lock().unwrap().iter().map(|(_, s)| *s).collect()
    }

    pub fn times_of(&self, state: State) -> Vec<Instant> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| *s == state)
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn last(&self) -> Option<State> {
        self.reports.lock().unwrap().last().map(|(_, s)| *s)
    }

    pub fn saw_alive(&self) -> bool {
        self.states().iter().any(|s| s.is_alive())
    }
}

/// Timers shortened so a full launch/attach cycle takes about a second
pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        ping_interval: Duration::from_secs(1),
        liveness_window: Duration::from_secs(5),
        attach_window: Duration::from_secs(10),
        lock_content_wait: Duration::from_secs(10),
        quit_window: Duration::from_secs(10),
        launch_timeout: Duration::from_secs(10),
        backoff_step: Duration::from_secs(1),
        close_grace: Duration::from_secs(20),
        reply_timeout: Duration::from_secs(2),
        ..SupervisorConfig::default()
    }
    .with_watcher_program(env!("CARGO_BIN_EXE_warden"))
}

pub fn supervisor(
    dir: &Path,
    descriptor: Descriptor,
    guard: Arc<RecordingGuard>,
) -> Supervisor {
    let work_dir = WorkDir::create(dir).expect("Failed to create working directory");
    Supervisor::new(work_dir, descriptor, guard, fast_config())
}

/// Start script that appends a line to `marker` and then runs until killed
pub fn marking_descriptor(marker: &Path) -> Descriptor {
    Descriptor::new(format!("echo started >> '{}'\nexec sleep 120", marker.display()))
        .expect("Failed to build descriptor")
}

/// Poll `condition` every 100ms until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }
    condition()
}

pub fn line_count(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|content| content.lines().count())
        .unwrap_or(0)
}

/// Like `is_process_alive`, but an exited process nobody has reaped yet
/// counts as gone. Orphaned watchers are reaped by init, which may lag.
pub fn is_running(pid: u32) -> bool {
    if !is_process_alive(pid) {
        return false;
    }
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => {
            let state = stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next());
            state != Some("Z")
        }
        Err(_) => true,
    }
}
