//! Run command - supervise the configured resources until interrupted

use anyhow::{Context, Result};
use chrono::Local;
use colored::{ColoredString, Colorize};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;

use crate::config::Config;
use crate::registry::{Manager, ShellType};
use crate::supervisor::{Guard, Properties, State, SupervisorConfig};

/// Prints every state change of one resource
pub struct ConsoleGuard {
    id: String,
    properties: Properties,
}

impl ConsoleGuard {
    pub fn new(id: impl Into<String>, properties: Properties) -> Self {
        Self {
            id: id.into(),
            properties,
        }
    }
}

impl Guard for ConsoleGuard {
    fn report_state(&self, state: State) -> Result<()> {
        println!(
            "{} {:<20} {}",
            Local::now().format("%H:%M:%S").to_string().dimmed(),
            self.id,
            state_label(state)
        );
        Ok(())
    }

    fn config_properties(&self) -> Properties {
        self.properties.clone()
    }
}

fn state_label(state: State) -> ColoredString {
    let name = state.to_string();
    match state {
        State::Started | State::Pinged => name.green(),
        State::Starting | State::WaitingForType => name.cyan(),
        State::Stopping | State::Stopped => name.dimmed(),
        State::Failed => name.red().bold(),
    }
}

/// Execute the run command. `detach` leaves every watcher running on exit.
pub fn execute(config_path: &Path, detach: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let root = config.root()?;

    let supervisor_config = SupervisorConfig {
        unattended_secs: config.unattended.unwrap_or(0),
        ..SupervisorConfig::default()
    };
    let manager = Manager::new(&root, supervisor_config)?;
    manager.register_type(ShellType::NAME, Arc::new(ShellType))?;

    println!("{}", "warden".bold().blue());
    println!("  Root:      {}", root.display());
    println!("  Resources: {}", config.resources.len());
    println!();

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    for resource in &config.resources {
        let guard = Arc::new(ConsoleGuard::new(&resource.id, resource.properties.clone()));
        manager
            .add_guard(
                &resource.id,
                &resource.type_name,
                guard,
                detach || resource.detach_on_close,
            )
            .with_context(|| format!("Failed to add resource '{}'", resource.id))?;
    }

    let _ = stop_rx.recv();
    println!("\n{} Shutting down...", "→".cyan().bold());
    manager.close_all()?;
    println!("{} All supervisors closed", "✓".green().bold());
    Ok(())
}
