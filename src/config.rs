//! `warden.toml`: the resources `warden run` supervises.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::registry::ShellType;
use crate::supervisor::Properties;
use crate::validation::validate_id;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Manager root; defaults to `<data dir>/warden`
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Seconds a watcher waits for the next ping before stopping on its own
    #[serde(default)]
    pub unattended: Option<u32>,
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    pub id: String,
    #[serde(default = "default_type", rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub detach_on_close: bool,
    #[serde(default)]
    pub properties: Properties,
}

fn default_type() -> String {
    ShellType::NAME.to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for resource in &self.resources {
            validate_id(&resource.id)?;
            validate_id(&resource.type_name)?;
            if !seen.insert(resource.id.as_str()) {
                bail!("resource '{}' is defined twice", resource.id);
            }
        }
        Ok(())
    }

    /// Configured root, or the platform data directory
    pub fn root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("warden"))
            .context("No data directory on this platform; set 'root' in the configuration")
    }
}
