//! Control-loop phases and the transition table between them.
//!
//! The table is pure: every phase executor in [`super::control`] returns an
//! [`Outcome`] and [`transition`] picks the next phase. Timing and I/O stay in
//! the executors.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Try to attach to a watcher left behind by an earlier host
    Reattach,
    /// Attached; verify the watcher runs the current descriptor
    ValidateAttached,
    /// Nothing attached; verify the on-disk scripts match the descriptor
    ValidateDetached,
    /// Attached to a watcher with stale configuration; quit it
    Replace,
    /// Write scripts and the descriptor snapshot
    Setup,
    /// Start a watcher and attach to it
    Launch,
    /// Report FAILED and wait before the next launch
    Backoff,
    /// Report FAILED and wait after an unexpected error
    Recover,
    /// Report STARTED
    Started,
    /// Ping the watcher once, then sleep
    Monitor,
    /// Liveness window expired; quit the watcher
    Abandon,
    /// Monitoring ended; report FAILED and start over
    Lost,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Result of executing one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// A deadline expired. Only meaningful for [`Phase::Monitor`]; elsewhere
    /// it counts as a failure.
    Timeout,
}

/// Next phase after `phase` finished with `outcome`.
///
/// In [`Phase::Monitor`], `Failure` means the lock is gone or now belongs to a
/// different watcher, and `Timeout` means the liveness window expired. A failed
/// ping inside the window is still `Success`.
pub fn transition(phase: Phase, outcome: Outcome) -> Phase {
    use Outcome::*;
    use Phase::*;

    match (phase, outcome) {
        (Reattach, Success) => ValidateAttached,
        (Reattach, _) => ValidateDetached,

        (ValidateAttached, Success) => Started,
        (ValidateAttached, _) => Replace,

        (ValidateDetached, Success) => Launch,
        (ValidateDetached, _) => Setup,

        (Replace, _) => Setup,

        (Setup, Success) => Launch,
        (Setup, _) => Recover,

        (Launch, Success) => Started,
        (Launch, _) => Backoff,

        (Backoff, _) => Launch,
        (Recover, _) => Reattach,

        (Started, _) => Monitor,

        (Monitor, Success) => Monitor,
        (Monitor, Failure) => Lost,
        (Monitor, Timeout) => Abandon,

        (Abandon, _) => Lost,
        (Lost, _) => Reattach,
    }
}

/// Linear backoff shared by launch failures and error recovery.
///
/// The n-th consecutive failure waits `n * step`. Reaching STARTED resets the
/// count.
#[derive(Debug, Clone)]
pub struct Backoff {
    step: Duration,
    tries: u32,
}

impl Backoff {
    pub fn new(step: Duration) -> Self {
        Self { step, tries: 0 }
    }

    /// Count one more failure and return how long to wait
    pub fn next_delay(&mut self) -> Duration {
        self.tries = self.tries.saturating_add(1);
        self.step.saturating_mul(self.tries)
    }

    pub fn reset(&mut self) {
        self.tries = 0;
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }
}
