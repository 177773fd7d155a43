//! Status command - show the watcher of a working directory

use anyhow::Result;
use colored::{ColoredString, Colorize};
use std::path::Path;

use super::{open_watcher, LockState};
use crate::process::is_process_alive;
use crate::protocol::{Client, Command, Request, WatcherStatus};

pub fn execute(dir: &Path) -> Result<()> {
    let (work_dir, lock) = open_watcher(dir)?;

    println!(
        "{}",
        format!("warden status: {}", work_dir.root().display())
            .bold()
            .blue()
    );
    println!("{}", "=".repeat(50));

    match work_dir.load_descriptor() {
        Ok(Some(descriptor)) => {
            if let Some(description) = &descriptor.description {
                println!("  Description: {description}");
            }
            println!("  Fingerprint: {}", descriptor.fingerprint()?);
        }
        Ok(None) => println!("  {} No descriptor written yet", "─".dimmed()),
        Err(e) => println!("  {} Descriptor unreadable: {e:#}", "⚠".yellow().bold()),
    }

    let record = match lock {
        LockState::Absent => {
            println!("  {} No watcher running", "─".dimmed());
            return Ok(());
        }
        LockState::Pending => {
            println!("  {} Watcher is starting", "→".cyan().bold());
            return Ok(());
        }
        LockState::Published(record) => record,
    };

    println!("  Watcher pid: {}", record.pid);
    println!("  Port:        {}", record.port);

    if !is_process_alive(record.pid) {
        println!("  {} Watcher process is gone (stale lock)", "✗".red().bold());
        return Ok(());
    }

    match Client::new(record.port).send(&Request::new(Command::Ping, 0)) {
        Ok(reply) => {
            println!("  Status:      {}", status_label(reply.status));
            if let Some(ping) = reply.ping.as_deref().filter(|p| !p.trim().is_empty()) {
                println!("  Health:      {}", ping.trim());
            }
            if let Some(alert) = &reply.alert {
                println!("  {} {alert}", "⚠".yellow().bold());
            }
        }
        Err(e) => println!("  {} No reply: {e}", "✗".red().bold()),
    }
    Ok(())
}

fn status_label(status: WatcherStatus) -> ColoredString {
    match status {
        WatcherStatus::Alive => "ALIVE".green().bold(),
        WatcherStatus::Starting => "STARTING".cyan(),
        WatcherStatus::Uncertain => "UNCERTAIN".yellow().bold(),
        WatcherStatus::Quiting => "QUITING".dimmed(),
    }
}
