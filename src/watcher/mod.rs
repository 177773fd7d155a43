//! The detached watcher process.
//!
//! Started by the LAUNCH script as `warden watch <dir>`. It leaves the host's
//! session, publishes `port:pid:token` in the lock file, runs START and then
//! serves heartbeat requests until told to stop or left unattended. On the way
//! out it stops the process and removes the lock if the lock still names it.

mod child;
mod heartbeat;
mod status_check;

pub use child::WatchedChild;
pub use heartbeat::{ExitReason, Heartbeat};
pub use status_check::{CheckResult, StatusCheck, NO_STATUS_SCRIPT};

use anyhow::{bail, Context, Result};
use std::net::{Ipv4Addr, UdpSocket};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::fs::lock_file::{self, LockError, LockRecord};
use crate::fs::WorkDir;
use crate::logging::TraceSwitch;
use crate::process::{detach_session, is_process_alive};

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// How long to wait for a request when the last one did not say
    pub unattended: Duration,
    /// Socket read timeout; bounds how quickly exit conditions are noticed.
    /// Also the pause between status checks.
    pub poll_interval: Duration,
    /// Bound on the PING status script
    pub status_timeout: Duration,
    /// Bound on the STOP script
    pub stop_timeout: Duration,
    /// Time between SIGTERM and SIGKILL for the process group
    pub terminate_grace: Duration,
    /// How long the process must have run before it can be reported ALIVE
    pub settle: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            unattended: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            status_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
            terminate_grace: Duration::from_secs(5),
            settle: Duration::from_secs(1),
        }
    }
}

/// Run the watcher for `dir` until it decides to exit
pub fn run(dir: &Path, config: &WatcherConfig, trace: Option<&TraceSwitch>) -> Result<ExitReason> {
    detach_session();

    let work_dir = WorkDir::open(dir)?;
    let lock = work_dir.lock_path();
    claimable(&lock)?;

    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).context("Failed to bind heartbeat socket")?;
    let port = socket.local_addr()?.port();
    let record = LockRecord::for_current_process(port);
    lock_file::publish(&lock, &record)?;
    tracing::info!(dir = %work_dir.root().display(), port, pid = record.pid, "watcher started");

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        tracing::warn!(error = %e, "failed to install signal handler");
    }

    let mut child = match WatchedChild::spawn(&work_dir) {
        Ok(child) => child,
        Err(e) => {
            lock_file::remove_if_owned(&lock, &record.token);
            return Err(e);
        }
    };

    let reason = Heartbeat::new(socket, &work_dir, &record, config)
        .with_trace(trace)
        .with_interrupt(interrupted)
        .run(&mut child);

    match &reason {
        Ok(reason) => tracing::info!(%reason, "watcher stopping"),
        Err(e) => tracing::error!(error = %e, "heartbeat socket failed"),
    }

    child.stop(&work_dir, config.stop_timeout, config.terminate_grace);
    lock_file::remove_if_owned(&lock, &record.token);
    tracing::info!(dir = %work_dir.root().display(), "watcher exited");

    reason.context("Heartbeat socket failed")
}

/// The launcher creates the lock empty before starting the watcher. Refuse to
/// run when it is gone or already names another live watcher.
fn claimable(lock: &Path) -> Result<()> {
    match lock_file::read_record(lock) {
        Ok(record) if record.pid != std::process::id() && is_process_alive(record.pid) => {
            bail!("watcher {} already holds {}", record.pid, lock.display())
        }
        Ok(_) | Err(LockError::Empty(_)) | Err(LockError::Malformed(_)) => Ok(()),
        Err(LockError::Missing(_)) => {
            bail!("no lock file at {}; the launcher gave up", lock.display())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_claimable_accepts_empty_lock() {
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join("lock");
        lock_file::create_empty(&lock).unwrap();

        assert!(claimable(&lock).is_ok());
    }

    #[test]
    fn test_claimable_rejects_missing_lock() {
        let temp = TempDir::new().unwrap();
        assert!(claimable(&temp.path().join("lock")).is_err());
    }

    #[test]
    fn test_claimable_rejects_live_holder() {
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join("lock");

        // pid 1 is always alive
        let record = LockRecord {
            port: 4000,
            pid: 1,
            token: "other".to_string(),
        };
        lock_file::publish(&lock, &record).unwrap();

        assert!(claimable(&lock).is_err());
    }

    #[test]
    fn test_claimable_accepts_dead_holder() {
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join("lock");
        let record = LockRecord {
            port: 4000,
            pid: 999_999_999,
            token: "gone".to_string(),
        };
        lock_file::publish(&lock, &record).unwrap();

        assert!(claimable(&lock).is_ok());
    }
}
