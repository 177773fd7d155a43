//! warden keeps external processes running across restarts of the host that
//! manages them.
//!
//! Each supervised process gets a detached watcher that owns it. The host's
//! [`supervisor::Supervisor`] talks to the watcher over a loopback heartbeat and
//! finds it again through a lock file, so a restarted host reattaches instead
//! of starting a second copy.

pub mod commands;
pub mod config;
pub mod descriptor;
pub mod fs;
pub mod logging;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod script;
pub mod supervisor;
pub mod validation;
pub mod watcher;
