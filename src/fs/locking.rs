//! Advisory file locking for setup of a working directory.
//!
//! Two supervisors pointed at the same directory may run setup at the same
//! time. Both take an exclusive `fs2` lock on a sentinel file before writing
//! scripts and the descriptor snapshot, so readers never observe a mix of two
//! setups. Advisory locks are cooperative: only code going through
//! [`lock_exclusive`] is serialized.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Held exclusive lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Block until an exclusive lock on `path` is held, creating the file if needed.
pub fn lock_exclusive(path: &Path) -> Result<LockGuard> {
    #[allow(clippy::suspicious_open_options)]
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
    FileExt::lock_exclusive(&file)
        .with_context(|| format!("Failed to acquire exclusive lock: {}", path.display()))?;
    Ok(LockGuard { file })
}
