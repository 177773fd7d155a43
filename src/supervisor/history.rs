//! Bounded audit log of supervisor events, kept for postmortem diagnosis.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

use super::guard::State;

/// Maximum number of retained events
pub const HISTORY_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Init,
    Detached,
    Interrupted,
    Sleep,
    CheckOk,
    CheckFailed,
    Setup,
    Launch,
    Finished,
    Attach,
    Ping,
    PingOk,
    PingFail,
    Quit,
    Lost,
    NoLock,
    Timeout,
    Alert,
    Error,
    Guard,
    Close,
    Send,
    Received,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug names are the variant names; pad for column output
        f.pad(&format!("{self:?}").to_uppercase())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    /// State last reported when the event happened
    pub state: State,
    pub pid: u32,
    pub port: u16,
    pub detail: String,
}

impl fmt::Display for HistoryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<12} {:<16} {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.kind,
            self.state,
            self.detail
        )
    }
}

/// Ring buffer of events, oldest first
#[derive(Debug)]
pub struct History {
    events: VecDeque<HistoryEvent>,
    capacity: usize,
}

impl History {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(HISTORY_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, event: HistoryEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Copy of the retained events, oldest first
    pub fn snapshot(&self) -> Vec<HistoryEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, detail: &str) -> HistoryEvent {
        HistoryEvent {
            timestamp: Utc::now(),
            kind,
            state: State::Starting,
            pid: 0,
            port: 0,
            detail: detail.to_string(),
        }
    }

    #[test]
    fn test_drops_oldest_past_capacity() {
        let mut history = History::new();
        for i in 0..(HISTORY_CAPACITY + 25) {
            history.push(event(EventKind::Ping, &i.to_string()));
        }

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), HISTORY_CAPACITY);
        assert_eq!(snapshot[0].detail, "25");
        assert_eq!(
            snapshot.last().unwrap().detail,
            (HISTORY_CAPACITY + 24).to_string()
        );
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let mut history = History::with_capacity(3);
        history.push(event(EventKind::Init, "a"));
        let snapshot = history.snapshot();
        history.push(event(EventKind::Launch, "b"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_display_columns() {
        let line = event(EventKind::PingOk, "fine").to_string();
        assert!(line.contains("PINGOK"));
        assert!(line.contains("STARTING"));
        assert!(line.ends_with("fine"));
    }
}
