use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use warden::commands::{run, status, stop, trace, watch};
use warden::logging;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Keep external processes running across host restarts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise the resources in a configuration file until Ctrl-C
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "warden.toml")]
        config: PathBuf,

        /// Leave watchers and their processes running on exit
        #[arg(long)]
        detach: bool,
    },

    /// Run the watcher for a working directory (started by the LAUNCH script)
    Watch {
        /// Working directory prepared by a supervisor
        dir: PathBuf,
    },

    /// Show the watcher and process state of a working directory
    Status {
        /// Working directory
        dir: PathBuf,
    },

    /// Stop the watcher of a working directory and its process
    Stop {
        /// Working directory
        dir: PathBuf,

        /// Seconds to retry QUIT before signalling the watcher
        #[arg(long, default_value_t = 31)]
        timeout: u64,
    },

    /// Switch a watcher's verbose logging
    Trace {
        /// Working directory
        dir: PathBuf,

        #[arg(value_enum)]
        mode: TraceMode,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TraceMode {
    On,
    Off,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The watcher installs its own reloadable subscriber
    if !matches!(cli.command, Commands::Watch { .. }) {
        logging::init();
    }

    match cli.command {
        Commands::Run { config, detach } => run::execute(&config, detach),
        Commands::Watch { dir } => watch::execute(&dir),
        Commands::Status { dir } => status::execute(&dir),
        Commands::Stop { dir, timeout } => stop::execute(&dir, Duration::from_secs(timeout)),
        Commands::Trace { dir, mode } => trace::execute(&dir, matches!(mode, TraceMode::On)),
    }
}
