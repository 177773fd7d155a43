//! Filesystem layout of one supervised instance.
//!
//! ```text
//! <dir>/lock              handshake, see fs::lock_file
//! <dir>/descriptor.json   canonical snapshot of the last setup
//! <dir>/LAUNCH            starts the watcher in the background
//! <dir>/START             descriptor start script
//! <dir>/STOP              descriptor stop script (optional)
//! <dir>/PING              descriptor status script (optional)
//! <dir>/log               watcher stdout + stderr
//! <dir>/work/             child process working directory
//! ```
//!
//! The directory is created on first use and never deleted here.

use anyhow::{bail, Context, Result};
use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::locking::lock_exclusive;
use crate::descriptor::Descriptor;

pub const LOCK_FILE: &str = "lock";
pub const DESCRIPTOR_FILE: &str = "descriptor.json";
pub const LOG_FILE: &str = "log";
pub const WORK_SUBDIR: &str = "work";
const SETUP_LOCK_FILE: &str = ".setup.lock";

/// Generated scripts in a working directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Launch,
    Start,
    Stop,
    Ping,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 4] = [
        ScriptKind::Launch,
        ScriptKind::Start,
        ScriptKind::Stop,
        ScriptKind::Ping,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ScriptKind::Launch => "LAUNCH",
            ScriptKind::Start => "START",
            ScriptKind::Stop => "STOP",
            ScriptKind::Ping => "PING",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Create the directory if needed and resolve it to an absolute path
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)
            .with_context(|| format!("Cannot create working directory: {}", path.display()))?;
        Self::open(path)
    }

    /// Open an existing directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            bail!("No such working directory: {}", path.display());
        }
        let root = fs::canonicalize(path)
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.root.join(DESCRIPTOR_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    pub fn work_path(&self) -> PathBuf {
        self.root.join(WORK_SUBDIR)
    }

    pub fn script_path(&self, kind: ScriptKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    pub fn has_script(&self, kind: ScriptKind) -> bool {
        self.script_path(kind).is_file()
    }

    /// Create `work/` if missing and return its path
    pub fn ensure_work_dir(&self) -> Result<PathBuf> {
        let work = self.work_path();
        fs::create_dir_all(&work)
            .with_context(|| format!("Cannot create work directory: {}", work.display()))?;
        Ok(work)
    }

    /// Load the persisted descriptor snapshot, `None` if there is none yet
    pub fn load_descriptor(&self) -> Result<Option<Descriptor>> {
        let path = self.descriptor_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        Descriptor::from_json(&content)
            .with_context(|| format!("Invalid descriptor snapshot: {}", path.display()))
            .map(Some)
    }

    pub fn remove_descriptor(&self) {
        remove_if_present(&self.descriptor_path());
    }

    /// Write the scripts for `descriptor` plus the launcher, then the snapshot.
    ///
    /// The snapshot is written last so that a crash midway leaves the
    /// directory looking unconfigured and the next setup starts over.
    pub fn write_setup(&self, descriptor: &Descriptor, launch_script: &str) -> Result<()> {
        let _guard = lock_exclusive(&self.root.join(SETUP_LOCK_FILE))?;

        self.remove_descriptor();
        let result = self
            .write_script(ScriptKind::Launch, Some(launch_script))
            .and_then(|_| self.write_script(ScriptKind::Start, Some(&descriptor.start_script)))
            .and_then(|_| self.write_script(ScriptKind::Stop, descriptor.stop_script.as_deref()))
            .and_then(|_| {
                self.write_script(ScriptKind::Ping, descriptor.status_script.as_deref())
            })
            .and_then(|_| {
                write_atomic(&self.descriptor_path(), &descriptor.canonical()?, 0o644)
            });

        if result.is_err() {
            for kind in ScriptKind::ALL {
                remove_if_present(&self.script_path(kind));
            }
        }
        result
    }

    /// Write one script, or remove it when the body is absent or blank
    fn write_script(&self, kind: ScriptKind, body: Option<&str>) -> Result<()> {
        let path = self.script_path(kind);
        match body.filter(|b| !b.trim().is_empty()) {
            Some(body) => write_atomic(&path, &format!("#!/bin/sh\n{body}\n"), 0o755),
            None => {
                remove_if_present(&path);
                Ok(())
            }
        }
    }
}

fn write_atomic(path: &Path, content: &str, mode: u32) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("No parent directory for {}", path.display()))?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tmp.as_file()
        .set_permissions(Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to install {}", path.display()))?;
    Ok(())
}

fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}
