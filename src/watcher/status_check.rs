//! Status check running beside the heartbeat loop.
//!
//! The PING script may run for up to its timeout, longer than a sender waits
//! for a reply. It runs on its own thread once per poll interval, and the
//! heartbeat answers PING from the last completed result.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::fs::{ScriptKind, WorkDir};
use crate::protocol::WatcherStatus;
use crate::script::{excerpt, run_script};

/// Status script output carried in a reply
pub const PING_DETAIL_LIMIT: usize = 600;

pub const NO_STATUS_SCRIPT: &str = "ok (no status script)";

/// Outcome of the latest status check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub status: WatcherStatus,
    pub detail: Option<String>,
}

impl CheckResult {
    /// Nothing has completed yet
    fn pending() -> Self {
        Self {
            status: WatcherStatus::Starting,
            detail: None,
        }
    }
}

/// Handle to the checking thread. Dropping it stops the thread after the
/// current script run.
pub struct StatusCheck {
    latest: Arc<Mutex<CheckResult>>,
    _stop: mpsc::Sender<()>,
}

impl StatusCheck {
    pub fn spawn(work_dir: WorkDir, timeout: Duration, interval: Duration) -> io::Result<Self> {
        let latest = Arc::new(Mutex::new(CheckResult::pending()));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let shared = Arc::clone(&latest);
        thread::Builder::new()
            .name("status-check".to_string())
            .spawn(move || loop {
                let result = check_once(&work_dir, timeout);
                tracing::trace!(status = ?result.status, "status check finished");
                *shared.lock().unwrap_or_else(PoisonError::into_inner) = result;

                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            latest,
            _stop: stop_tx,
        })
    }

    pub fn latest(&self) -> CheckResult {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Run the status script once. No script means alive.
fn check_once(work_dir: &WorkDir, timeout: Duration) -> CheckResult {
    if !work_dir.has_script(ScriptKind::Ping) {
        return CheckResult {
            status: WatcherStatus::Alive,
            detail: Some(NO_STATUS_SCRIPT.to_string()),
        };
    }

    let script = work_dir.script_path(ScriptKind::Ping);
    match run_script(&script, &work_dir.work_path(), timeout) {
        Ok(outcome) => CheckResult {
            status: if outcome.success() {
                WatcherStatus::Alive
            } else {
                WatcherStatus::Uncertain
            },
            detail: Some(outcome.output_excerpt(PING_DETAIL_LIMIT)),
        },
        Err(e) => CheckResult {
            status: WatcherStatus::Uncertain,
            detail: Some(excerpt(&format!("{e:#}"), PING_DETAIL_LIMIT)),
        },
    }
}
