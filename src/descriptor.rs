//! Descriptor of an external process: how to start, stop, and check it.
//!
//! A descriptor is produced by a [`ProcessType`](crate::registry::ProcessType)
//! from configuration properties. It is immutable once built. The supervisor
//! persists it as canonical JSON in the working directory and compares the
//! serialized forms to decide whether the configuration changed.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Shell fragments describing one supervised process.
///
/// The start script must leave the real process as the script's own process,
/// usually by ending in `exec`, so that the exit code and process identity
/// propagate to the watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Script that runs the process in the foreground. Required.
    pub start_script: String,
    /// Optional graceful stop. Must tolerate being run twice.
    #[serde(default)]
    pub stop_script: Option<String>,
    /// Optional health check; exit code 0 means alive.
    #[serde(default)]
    pub status_script: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Descriptor {
    /// Create a descriptor with only a start script
    pub fn new(start_script: impl Into<String>) -> Result<Self> {
        let start_script = start_script.into();
        if start_script.trim().is_empty() {
            bail!("Descriptor requires a non-empty start script");
        }
        Ok(Self {
            start_script,
            stop_script: None,
            status_script: None,
            description: None,
        })
    }

    pub fn with_stop_script(mut self, script: impl Into<String>) -> Self {
        self.stop_script = non_blank(script.into());
        self
    }

    pub fn with_status_script(mut self, script: impl Into<String>) -> Self {
        self.status_script = non_blank(script.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = non_blank(description.into());
        self
    }

    /// Canonical serialized form used for change detection.
    ///
    /// Field order is fixed by the struct definition, so equal descriptors
    /// always produce byte-identical output.
    pub fn canonical(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize descriptor")
    }

    /// SHA-256 of the canonical form, hex encoded
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = self.canonical()?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Decode a persisted descriptor
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse descriptor JSON")
    }

    /// Compare by canonical serialized form, never by identity
    pub fn same_configuration(&self, other: &Descriptor) -> bool {
        match (self.canonical(), other.canonical()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
