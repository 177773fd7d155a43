//! Host-side supervision of one external process.
//!
//! A [`Supervisor`] owns a working directory. Its control thread writes the
//! scripts derived from a [`Descriptor`](crate::descriptor::Descriptor), starts
//! a detached watcher through the LAUNCH script, pings it over the loopback
//! heartbeat and reports lifecycle [`State`]s to a [`Guard`]. The watcher
//! outlives the host, so a restarted host reattaches instead of relaunching.

mod config;
mod control;
mod core;
mod guard;
mod history;
mod machine;
mod shutdown;

pub use config::SupervisorConfig;
pub use control::launch_script;
pub use self::core::Supervisor;
pub use guard::{Guard, Properties, State};
pub use history::{EventKind, History, HistoryEvent, HISTORY_CAPACITY};
pub use machine::{transition, Backoff, Outcome, Phase};
pub use shutdown::Shutdown;
