//! Process types turn a resource's properties into a [`Descriptor`].

use anyhow::{Context, Result};
use std::path::Path;

use crate::descriptor::Descriptor;
use crate::supervisor::Properties;

pub const START_PROPERTY: &str = "start";
pub const STOP_PROPERTY: &str = "stop";
pub const STATUS_PROPERTY: &str = "status";
pub const DESCRIPTION_PROPERTY: &str = "description";

/// Builds the descriptor for one resource.
///
/// `storage` is a directory private to the type, shared by all its
/// resources, for files the scripts may need (binaries, templates).
pub trait ProcessType: Send + Sync {
    fn create(&self, properties: &Properties, storage: &Path) -> Result<Descriptor>;
}

/// Takes the scripts verbatim from the `start`, `stop`, `status` and
/// `description` properties.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellType;

impl ShellType {
    pub const NAME: &'static str = "shell";
}

impl ProcessType for ShellType {
    fn create(&self, properties: &Properties, _storage: &Path) -> Result<Descriptor> {
        let start = properties
            .get(START_PROPERTY)
            .context("shell resource needs a 'start' property")?;
        let property = |key: &str| properties.get(key).cloned().unwrap_or_default();

        Ok(Descriptor::new(start.as_str())?
            .with_stop_script(property(STOP_PROPERTY))
            .with_status_script(property(STATUS_PROPERTY))
            .with_description(property(DESCRIPTION_PROPERTY)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_type_maps_properties() {
        let mut properties = Properties::new();
        properties.insert("start".into(), "exec sleep 100".into());
        properties.insert("status".into(), "kill -0 $(cat pid)".into());

        let descriptor = ShellType.create(&properties, Path::new("/tmp")).unwrap();
        assert_eq!(descriptor.start_script, "exec sleep 100");
        assert_eq!(descriptor.status_script.as_deref(), Some("kill -0 $(cat pid)"));
        assert!(descriptor.stop_script.is_none());
        assert!(descriptor.description.is_none());
    }

    #[test]
    fn test_shell_type_requires_start() {
        let err = ShellType
            .create(&Properties::new(), Path::new("/tmp"))
            .unwrap_err();
        assert!(err.to_string().contains("start"));
    }

    #[test]
    fn test_shell_type_rejects_blank_start() {
        let mut properties = Properties::new();
        properties.insert("start".into(), "   ".into());
        assert!(ShellType.create(&properties, Path::new("/tmp")).is_err());
    }
}
