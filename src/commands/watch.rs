//! Watch command - the watcher process started by the LAUNCH script

use anyhow::Result;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;

use crate::logging;
use crate::watcher::{self, ExitReason, WatcherConfig};

/// Run the watcher. When the process ends on its own the watcher exits with
/// the process's exit code.
pub fn execute(dir: &Path) -> Result<()> {
    let trace = logging::init_reloadable();
    if trace.is_none() {
        logging::init();
    }

    let reason = watcher::run(dir, &WatcherConfig::default(), trace.as_ref())?;
    if let ExitReason::ProcessExited(status) = reason {
        tracing::warn!(%status, "supervised process ended on its own");
        // A signal death maps to 128 + signal, as in the shell
        let code = status
            .code()
            .or_else(|| status.signal().map(|signal| 128 + signal))
            .unwrap_or(1);
        if code != 0 {
            std::process::exit(code);
        }
    }
    Ok(())
}
