//! Stop command - ask a watcher to stop its process and exit.
//!
//! A supervisor still attached to the directory will launch a new watcher.

use anyhow::{bail, Result};
use colored::Colorize;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use super::{open_watcher, LockState};
use crate::fs::lock_file;
use crate::process::{is_process_alive, terminate_group};
use crate::protocol::{Client, Command, Request, WatcherStatus};

const RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Covers the watcher's stop script and kill grace
const EXIT_WAIT: Duration = Duration::from_secs(20);

pub fn execute(dir: &Path, timeout: Duration) -> Result<()> {
    let (work_dir, lock) = open_watcher(dir)?;
    let record = match lock {
        LockState::Published(record) if is_process_alive(record.pid) => record,
        LockState::Published(record) => {
            lock_file::remove_if_owned(&work_dir.lock_path(), &record.token);
            println!("{} Watcher is not running (removed stale lock)", "─".dimmed());
            return Ok(());
        }
        LockState::Pending => bail!("Watcher is still starting; try again shortly"),
        LockState::Absent => {
            println!("{} Watcher is not running", "─".dimmed());
            return Ok(());
        }
    };

    println!("{} Stopping watcher {}...", "→".cyan().bold(), record.pid);

    let client = Client::new(record.port);
    let deadline = Instant::now() + timeout;
    let mut acknowledged = false;
    while Instant::now() < deadline {
        match client.send(&Request::new(Command::Quit, 0)) {
            Ok(reply) if reply.status == WatcherStatus::Quiting => {
                acknowledged = true;
                break;
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "quit not acknowledged"),
        }
        thread::sleep(RETRY_PAUSE);
    }

    let lock = work_dir.lock_path();
    if !acknowledged {
        println!(
            "{} No acknowledgement, sending SIGTERM to {}",
            "⚠".yellow().bold(),
            record.pid
        );
        terminate_group(record.pid, EXIT_WAIT);
    } else {
        let deadline = Instant::now() + EXIT_WAIT;
        while lock_file::is_owned_by(&lock, &record.token) && Instant::now() < deadline {
            thread::sleep(RETRY_PAUSE);
        }
    }

    if lock_file::remove_if_owned(&lock, &record.token) {
        println!("{} Removed leftover lock", "─".dimmed());
    }
    println!("{} Watcher stopped", "✓".green().bold());
    Ok(())
}
