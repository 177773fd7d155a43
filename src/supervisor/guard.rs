//! Lifecycle states reported to the host and the [`Guard`] callback.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw configuration properties of one supervised resource
pub type Properties = BTreeMap<String, String>;

/// Coarse lifecycle state pushed to the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    WaitingForType,
    Starting,
    Started,
    Pinged,
    Stopping,
    Stopped,
    Failed,
}

impl State {
    /// Whether the external process is believed to be running
    pub fn is_alive(self) -> bool {
        matches!(self, State::Started | State::Pinged)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::WaitingForType => "WAITING_FOR_TYPE",
            State::Starting => "STARTING",
            State::Started => "STARTED",
            State::Pinged => "PINGED",
            State::Stopping => "STOPPING",
            State::Stopped => "STOPPED",
            State::Failed => "FAILED",
        };
        f.pad(name)
    }
}

/// Host-side sink for lifecycle notifications.
///
/// Called from the supervisor thread, one call at a time, in transition order.
/// Errors and panics are recorded in the supervisor history and otherwise
/// ignored.
pub trait Guard: Send + Sync {
    fn report_state(&self, state: State) -> anyhow::Result<()>;

    /// Configuration handed to the process type that builds the descriptor
    fn config_properties(&self) -> Properties {
        Properties::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_started_and_pinged_are_alive() {
        let alive: Vec<State> = [
            State::WaitingForType,
            State::Starting,
            State::Started,
            State::Pinged,
            State::Stopping,
            State::Stopped,
            State::Failed,
        ]
        .into_iter()
        .filter(|s| s.is_alive())
        .collect();

        assert_eq!(alive, vec![State::Started, State::Pinged]);
    }

    #[test]
    fn test_display_uses_wire_names() {
        assert_eq!(State::WaitingForType.to_string(), "WAITING_FOR_TYPE");
        assert_eq!(format!("{:<8}|", State::Failed), "FAILED  |");
    }
}
