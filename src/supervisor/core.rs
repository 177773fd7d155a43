//! Public supervisor handle and the state it shares with its control thread.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::config::SupervisorConfig;
use super::control::ControlLoop;
use super::guard::{Guard, State};
use super::history::{EventKind, History, HistoryEvent};
use super::shutdown::Shutdown;
use crate::descriptor::Descriptor;
use crate::fs::WorkDir;

/// State shared between a [`Supervisor`] handle and its control thread
pub(super) struct Shared {
    pub work_dir: WorkDir,
    pub descriptor: Descriptor,
    pub guard: Arc<dyn Guard>,
    pub config: SupervisorConfig,
    pub shutdown: Shutdown,
    pub detach_on_close: AtomicBool,
    pub pid: AtomicU32,
    pub port: AtomicU16,
    /// Seconds the watcher waits for the next ping; 0 keeps its default
    pub unattended: AtomicU32,
    /// Pending TRACE_ON/TRACE_OFF request, sent before the next ping
    pub trace_request: Mutex<Option<bool>>,
    pub trace: AtomicBool,
    pub state: Mutex<State>,
    pub history: Mutex<History>,
}

impl Shared {
    pub fn state(&self) -> State {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, state: State) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn record(&self, kind: EventKind, detail: impl Into<String>) {
        let event = HistoryEvent {
            timestamp: Utc::now(),
            kind,
            state: self.state(),
            pid: self.pid.load(Ordering::SeqCst),
            port: self.port.load(Ordering::SeqCst),
            detail: detail.into(),
        };

        let dir = self.work_dir.root().display();
        if self.trace.load(Ordering::Relaxed) {
            tracing::info!(dir = %dir, kind = %event.kind, state = %event.state, "{}", event.detail);
        } else {
            tracing::debug!(dir = %dir, kind = %event.kind, state = %event.state, "{}", event.detail);
        }

        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Keeps one external process running through a detached watcher.
///
/// All work happens on a background thread started by [`Supervisor::start`].
/// The handle only flips flags and reads snapshots, so every method is cheap
/// and safe to call from any thread.
pub struct Supervisor {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

struct Running {
    handle: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

impl Supervisor {
    pub fn new(
        work_dir: WorkDir,
        descriptor: Descriptor,
        guard: Arc<dyn Guard>,
        config: SupervisorConfig,
    ) -> Self {
        let unattended = AtomicU32::new(config.unattended_secs);
        let shared = Shared {
            work_dir,
            descriptor,
            guard,
            config,
            shutdown: Shutdown::new(),
            detach_on_close: AtomicBool::new(false),
            pid: AtomicU32::new(0),
            port: AtomicU16::new(0),
            unattended,
            trace_request: Mutex::new(None),
            trace: AtomicBool::new(false),
            state: Mutex::new(State::WaitingForType),
            history: Mutex::new(History::new()),
        };
        Self {
            shared: Arc::new(shared),
            running: Mutex::new(None),
        }
    }

    /// Spawn the control thread. Fails if it was already started or closed.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            bail!("supervisor for {} is already running", self.dir_name());
        }
        if self.shared.shutdown.is_requested() {
            bail!("supervisor for {} was closed", self.dir_name());
        }

        self.shared.record(
            EventKind::Init,
            format!("supervising {}", self.shared.work_dir.root().display()),
        );

        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("supervisor:{}", self.dir_name()))
            .spawn(move || {
                ControlLoop::new(shared).run();
                let _ = done_tx.send(());
            })
            .context("Failed to spawn supervisor thread")?;

        *running = Some(Running {
            handle,
            done: done_rx,
        });
        Ok(())
    }

    /// Stop supervising and wait up to the configured grace period for the
    /// control thread to finish.
    ///
    /// Unless detach-on-close is set, the watcher and its process are stopped
    /// on the way out. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if !self.shared.shutdown.is_requested() {
            self.shared.record(EventKind::Close, "close requested");
        }
        self.shared.shutdown.request();

        let Some(Running { handle, done }) = running else {
            return Ok(());
        };

        let grace = self.shared.config.close_grace;
        match done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    bail!("supervisor thread for {} panicked", self.dir_name());
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                self.shared.record(
                    EventKind::Timeout,
                    format!("control loop still running after {grace:?}"),
                );
                bail!(
                    "supervisor for {} did not stop within {grace:?}",
                    self.dir_name()
                )
            }
        }
    }

    /// When set, closing leaves the watcher and its process running so a
    /// later supervisor can reattach.
    pub fn set_detach_on_close(&self, detach: bool) {
        self.shared.detach_on_close.store(detach, Ordering::SeqCst);
    }

    /// Ask the watcher to wait this many seconds for the next ping before it
    /// shuts itself down. Takes effect with the next request.
    pub fn set_unattended(&self, secs: u32) {
        self.shared.unattended.store(secs, Ordering::SeqCst);
    }

    /// Toggle verbose logging in this supervisor and, with the next ping,
    /// in the watcher.
    pub fn set_trace(&self, on: bool) {
        self.shared.trace.store(on, Ordering::SeqCst);
        *self
            .shared
            .trace_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(on);
    }

    /// Pid of the watcher last attached to, or 0
    pub fn pid(&self) -> u32 {
        self.shared.pid.load(Ordering::SeqCst)
    }

    /// Last state reported to the guard
    pub fn state(&self) -> State {
        self.shared.state()
    }

    pub fn history(&self) -> Vec<HistoryEvent> {
        self.shared
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn work_dir(&self) -> &WorkDir {
        &self.shared.work_dir
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.shared.descriptor
    }

    fn dir_name(&self) -> String {
        self.shared
            .work_dir
            .root()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Drop for Supervisor {
    /// A dropped handle can no longer be closed, so the loop is told to stop.
    /// This does not wait for it.
    fn drop(&mut self) {
        self.shared.shutdown.request();
    }
}
