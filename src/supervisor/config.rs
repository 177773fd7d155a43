//! Timing and launch settings for one supervisor

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::REPLY_TIMEOUT;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Executable started by the LAUNCH script as `<program> watch <dir>`
    pub watcher_program: PathBuf,
    /// Sleep between pings while monitoring
    pub ping_interval: Duration,
    /// How long pings may fail before the watcher is abandoned
    pub liveness_window: Duration,
    /// How long attach keeps pinging before giving up
    pub attach_window: Duration,
    /// How long an empty lock file is tolerated before it is treated as stale
    pub lock_content_wait: Duration,
    /// How long closing waits for a just-launched watcher to publish its lock
    pub publish_wait: Duration,
    /// How long QUIT is retried before the lock is removed regardless
    pub quit_window: Duration,
    /// Bound on the LAUNCH script run
    pub launch_timeout: Duration,
    /// Backoff unit; the n-th consecutive failure waits n times this
    pub backoff_step: Duration,
    /// How long `close` waits for the control loop to exit
    pub close_grace: Duration,
    /// Per-request reply timeout
    pub reply_timeout: Duration,
    /// Seconds the watcher waits for the next request; 0 keeps its default
    pub unattended_secs: u32,
}

impl SupervisorConfig {
    pub fn with_watcher_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.watcher_program = program.into();
        self
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            watcher_program: std::env::current_exe().unwrap_or_else(|_| PathBuf::from("warden")),
            ping_interval: Duration::from_secs(10),
            liveness_window: Duration::from_secs(30),
            attach_window: Duration::from_secs(30),
            lock_content_wait: Duration::from_secs(30),
            publish_wait: Duration::from_secs(5),
            quit_window: Duration::from_secs(31),
            launch_timeout: Duration::from_secs(30),
            backoff_step: Duration::from_secs(5),
            close_grace: Duration::from_secs(15),
            reply_timeout: REPLY_TIMEOUT,
            unattended_secs: 0,
        }
    }
}
