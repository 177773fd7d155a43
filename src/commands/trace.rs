//! Trace command - switch a watcher's verbose logging on or off

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::path::Path;

use super::{open_watcher, LockState};
use crate::protocol::{Client, Command, Request};

pub fn execute(dir: &Path, on: bool) -> Result<()> {
    let (work_dir, lock) = open_watcher(dir)?;
    let LockState::Published(record) = lock else {
        bail!("No watcher running in {}", work_dir.root().display());
    };

    let command = if on { Command::TraceOn } else { Command::TraceOff };
    let reply = Client::new(record.port)
        .send(&Request::new(command, 0))
        .with_context(|| format!("Watcher {} did not answer {command}", record.pid))?;

    println!("{} {}", "✓".green().bold(), reply.message);
    Ok(())
}
