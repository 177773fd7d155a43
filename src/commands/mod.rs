pub mod run;
pub mod status;
pub mod stop;
pub mod trace;
pub mod watch;

use anyhow::Result;
use std::path::Path;

use crate::fs::lock_file::{self, LockError, LockRecord};
use crate::fs::WorkDir;

/// What the lock file of a working directory says about its watcher
pub(crate) enum LockState {
    Absent,
    /// A launcher created the lock but the watcher has not published yet
    Pending,
    Published(LockRecord),
}

pub(crate) fn open_watcher(dir: &Path) -> Result<(WorkDir, LockState)> {
    let work_dir = WorkDir::open(dir)?;
    let state = match lock_file::read_record(&work_dir.lock_path()) {
        Ok(record) => LockState::Published(record),
        Err(LockError::Missing(_)) => LockState::Absent,
        Err(LockError::Empty(_)) => LockState::Pending,
        Err(e) => return Err(e.into()),
    };
    Ok((work_dir, state))
}
