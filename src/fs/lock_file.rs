//! The lock file handshake between supervisor and watcher.
//!
//! The supervisor creates the lock file empty (with `O_EXCL`) before it launches
//! a watcher. The watcher publishes `port:pid:token` by writing a temp file in
//! the same directory and renaming it over the lock, so a reader sees either
//! the empty file or the full record, never a partial line.
//!
//! Any access may race with the other process. Missing, empty, and malformed
//! content are all ordinary outcomes reported through [`LockError`].

use anyhow::{Context, Result};
use regex::Regex;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

static LOCK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+):(\d+):(\S+)$").expect("lock line pattern is valid")
});

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file not found: {0}")]
    Missing(PathBuf),
    #[error("lock file is empty: {0}")]
    Empty(PathBuf),
    #[error("lock file already exists: {0}")]
    Exists(PathBuf),
    #[error("malformed lock content: {0:?}")]
    Malformed(String),
    #[error("failed to access lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Content of a published lock file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// UDP port the watcher listens on (loopback only)
    pub port: u16,
    /// Watcher process id
    pub pid: u32,
    /// Unique token identifying this watcher incarnation
    pub token: String,
}

impl LockRecord {
    /// Record for the current process with a fresh token
    pub fn for_current_process(port: u16) -> Self {
        Self {
            port,
            pid: std::process::id(),
            token: Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.port, self.pid, self.token)
    }
}

impl FromStr for LockRecord {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let caps = LOCK_LINE
            .captures(line)
            .ok_or_else(|| LockError::Malformed(line.to_string()))?;

        let port = caps[1]
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| LockError::Malformed(line.to_string()))?;
        let pid = caps[2]
            .parse::<u32>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| LockError::Malformed(line.to_string()))?;

        Ok(Self {
            port,
            pid,
            token: caps[3].to_string(),
        })
    }
}

/// Read the raw lock content. Empty content is returned as-is.
pub fn read_raw(path: &Path) -> Result<String, LockError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(LockError::Missing(path.to_path_buf())),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Read and parse the lock record
pub fn read_record(path: &Path) -> Result<LockRecord, LockError> {
    let content = read_raw(path)?;
    if content.trim().is_empty() {
        return Err(LockError::Empty(path.to_path_buf()));
    }
    content.parse()
}

/// Create the lock file empty, failing if it already exists.
///
/// This is the mutual exclusion gate: only one launcher can win.
pub fn create_empty(path: &Path) -> Result<(), LockError> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(LockError::Exists(path.to_path_buf()))
        }
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Atomically replace the lock file with a fully formed record
pub fn publish(path: &Path, record: &LockRecord) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("Lock file has no parent directory: {}", path.display()))?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp lock file in {}", dir.display()))?;
    tmp.write_all(record.to_string().as_bytes())
        .context("Failed to write temp lock file")?;
    tmp.flush().context("Failed to flush temp lock file")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to rename temp lock file to {}", path.display()))?;
    Ok(())
}

/// True when the lock file currently carries `token`
pub fn is_owned_by(path: &Path, token: &str) -> bool {
    matches!(read_record(path), Ok(record) if record.token == token)
}

/// Remove the lock file only if it still carries `token`.
///
/// Returns true when the file was removed.
pub fn remove_if_owned(path: &Path, token: &str) -> bool {
    is_owned_by(path, token) && remove(path)
}

/// Remove the lock file only if its raw content still equals `expected`.
pub fn remove_if_unchanged(path: &Path, expected: &str) -> bool {
    match read_raw(path) {
        Ok(content) if content == expected => remove(path),
        _ => false,
    }
}

/// Remove the lock file, ignoring a concurrent removal.
///
/// Returns true when this call removed it.
pub fn remove(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove lock file");
            false
        }
    }
}
