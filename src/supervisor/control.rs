//! The supervisor's control loop.
//!
//! Runs [`Phase`] executors until a stop is requested, then either quits the
//! watcher or leaves it running for a later host (detach-on-close).

use anyhow::Result;
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::core::Shared;
use super::guard::State;
use super::history::EventKind;
use super::machine::{transition, Backoff, Outcome, Phase};
use crate::fs::lock_file::{self, LockError, LockRecord};
use crate::fs::{ScriptKind, WorkDir};
use crate::process::is_process_alive;
use crate::protocol::{Client, Command, ProtocolError, Reply, Request, WatcherStatus};
use crate::script::{self, excerpt};

/// Poll interval while waiting for the watcher to publish its lock record
const LOCK_POLL: Duration = Duration::from_millis(100);

/// Pause between unanswered pings during attach and quit
const RETRY_PAUSE: Duration = Duration::from_millis(500);

const DETAIL_LIMIT: usize = 300;

/// Build the LAUNCH script body that starts a detached watcher for `work_dir`
pub fn launch_script(program: &Path, work_dir: &WorkDir) -> String {
    let quote = |p: &Path| shell_escape::escape(Cow::Owned(p.to_string_lossy().into_owned())).into_owned();
    format!(
        "nohup {} watch {} </dev/null >>{} 2>&1 &",
        quote(program),
        quote(work_dir.root()),
        quote(&work_dir.log_path()),
    )
}

pub(super) struct ControlLoop {
    shared: Arc<Shared>,
    backoff: Backoff,
    /// Watcher currently attached to
    target: Option<LockRecord>,
    /// Set while this supervisor holds an empty lock it created for a launch
    created_lock: bool,
    liveness_deadline: Instant,
}

impl ControlLoop {
    pub fn new(shared: Arc<Shared>) -> Self {
        let backoff = Backoff::new(shared.config.backoff_step);
        Self {
            shared,
            backoff,
            target: None,
            created_lock: false,
            liveness_deadline: Instant::now(),
        }
    }

    pub fn run(mut self) {
        let mut phase = Phase::Reattach;

        while !self.shared.shutdown.is_requested() {
            let outcome = match catch_unwind(AssertUnwindSafe(|| self.step(phase))) {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    self.record(EventKind::Error, format!("{phase}: {e:#}"));
                    phase = Phase::Recover;
                    continue;
                }
                Err(_) => {
                    self.record(EventKind::Error, format!("{phase}: panicked"));
                    phase = Phase::Recover;
                    continue;
                }
            };
            phase = transition(phase, outcome);
        }

        self.record(EventKind::Interrupted, "leaving control loop");
        if self.shared.detach_on_close.load(Ordering::SeqCst) {
            self.record(EventKind::Detached, "leaving watcher running");
        } else {
            self.quit("supervisor closed");
        }
    }

    fn step(&mut self, phase: Phase) -> Result<Outcome> {
        let outcome = match phase {
            Phase::Reattach => {
                self.report(State::WaitingForType);
                succeed(self.attach("reattach existing watcher"))
            }
            Phase::ValidateAttached | Phase::ValidateDetached => succeed(self.check()),
            Phase::Replace => {
                self.quit("configuration changed");
                Outcome::Success
            }
            Phase::Setup => {
                self.setup()?;
                Outcome::Success
            }
            Phase::Launch => {
                self.report(State::Starting);
                succeed(self.launch()?)
            }
            Phase::Backoff | Phase::Recover => {
                self.report(State::Failed);
                let delay = self.backoff.next_delay();
                let why = if phase == Phase::Backoff {
                    "launch failed"
                } else {
                    "recovering from error"
                };
                self.sleep(why, delay);
                Outcome::Success
            }
            Phase::Started => {
                self.backoff.reset();
                self.liveness_deadline = Instant::now() + self.shared.config.liveness_window;
                self.report(State::Started);
                Outcome::Success
            }
            Phase::Monitor => self.monitor(),
            Phase::Abandon => {
                self.quit("no ALIVE reply within the liveness window");
                Outcome::Success
            }
            Phase::Lost => {
                self.set_target(None);
                self.report(State::Failed);
                Outcome::Success
            }
        };
        Ok(outcome)
    }

    /// Connect to the watcher named by the lock file and wait for it to
    /// report ALIVE.
    fn attach(&mut self, why: &str) -> bool {
        self.record(EventKind::Attach, why);
        let lock = self.shared.work_dir.lock_path();

        let deadline = Instant::now() + self.shared.config.lock_content_wait;
        let raw = loop {
            if self.shared.shutdown.is_requested() {
                return false;
            }
            match lock_file::read_raw(&lock) {
                Ok(content) if content.trim().is_empty() => {
                    if Instant::now() >= deadline {
                        self.record(EventKind::NoLock, "lock stayed empty, removing it");
                        lock_file::remove_if_unchanged(&lock, &content);
                        self.created_lock = false;
                        return false;
                    }
                    self.shared.shutdown.sleep(LOCK_POLL);
                }
                Ok(content) => break content,
                Err(LockError::Missing(_)) => {
                    self.record(EventKind::NoLock, "no lock file");
                    return false;
                }
                Err(e) => {
                    self.record(EventKind::Error, e.to_string());
                    return false;
                }
            }
        };
        self.created_lock = false;

        let record: LockRecord = match raw.parse() {
            Ok(record) => record,
            Err(e) => {
                self.record(EventKind::Error, format!("{e}, removing lock"));
                lock_file::remove_if_unchanged(&lock, &raw);
                return false;
            }
        };

        if !is_process_alive(record.pid) {
            self.record(
                EventKind::Lost,
                format!("watcher {} is gone, removing stale lock", record.pid),
            );
            lock_file::remove_if_unchanged(&lock, &raw);
            return false;
        }

        self.set_target(Some(record));

        let deadline = Instant::now() + self.shared.config.attach_window;
        while Instant::now() < deadline {
            if self.shared.shutdown.is_requested() {
                return false;
            }
            if !matches!(lock_file::read_raw(&lock), Ok(ref now) if *now == raw) {
                self.record(EventKind::NoLock, "lock changed during attach");
                return false;
            }
            if let Some(reply) = self.send(Command::Ping) {
                if reply.status == WatcherStatus::Alive {
                    self.record(EventKind::Attach, format!("attached to {}", raw.trim()));
                    return true;
                }
            }
            self.shared.shutdown.sleep(RETRY_PAUSE);
        }

        self.record(EventKind::Timeout, "no ALIVE reply within the attach window");
        false
    }

    /// Whether the on-disk scripts and snapshot match the current descriptor
    fn check(&self) -> bool {
        let work_dir = &self.shared.work_dir;
        match work_dir.load_descriptor() {
            Ok(Some(snapshot)) if snapshot.same_configuration(&self.shared.descriptor) => {
                let missing: Vec<&str> = [ScriptKind::Launch, ScriptKind::Start]
                    .into_iter()
                    .filter(|kind| !work_dir.has_script(*kind))
                    .map(ScriptKind::file_name)
                    .collect();
                if missing.is_empty() {
                    self.record(EventKind::CheckOk, "descriptor unchanged");
                    true
                } else {
                    self.record(
                        EventKind::CheckFailed,
                        format!("missing scripts: {}", missing.join(", ")),
                    );
                    false
                }
            }
            Ok(Some(_)) => {
                self.record(EventKind::CheckFailed, "descriptor changed");
                false
            }
            Ok(None) => {
                self.record(EventKind::CheckFailed, "no descriptor snapshot");
                false
            }
            Err(e) => {
                self.record(EventKind::CheckFailed, format!("{e:#}"));
                work_dir.remove_descriptor();
                false
            }
        }
    }

    fn setup(&self) -> Result<()> {
        let work_dir = &self.shared.work_dir;
        let launch = launch_script(&self.shared.config.watcher_program, work_dir);
        work_dir.write_setup(&self.shared.descriptor, &launch)?;
        self.record(
            EventKind::Setup,
            format!("fingerprint {}", self.shared.descriptor.fingerprint()?),
        );
        Ok(())
    }

    /// Run LAUNCH and attach to the watcher it starts.
    ///
    /// If a lock already exists another host launched first; attach to its
    /// watcher instead of starting a second one.
    fn launch(&mut self) -> Result<bool> {
        let work_dir = &self.shared.work_dir;
        work_dir.ensure_work_dir()?;
        let lock = work_dir.lock_path();

        match lock_file::create_empty(&lock) {
            Ok(()) => self.created_lock = true,
            Err(LockError::Exists(_)) => {
                return Ok(self.attach("lock already present, attaching instead"));
            }
            Err(e) => return Err(e.into()),
        }

        let launch_path = work_dir.script_path(ScriptKind::Launch);
        self.record(EventKind::Launch, launch_path.display().to_string());
        let outcome = match script::run_script(
            &launch_path,
            work_dir.root(),
            self.shared.config.launch_timeout,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.release_created_lock();
                return Err(e);
            }
        };
        self.record(EventKind::Finished, outcome.summary());

        if !outcome.success() {
            self.record(EventKind::Error, outcome.output_excerpt(DETAIL_LIMIT));
            self.release_created_lock();
            return Ok(false);
        }

        Ok(self.attach("launched watcher"))
    }

    fn monitor(&mut self) -> Outcome {
        let lock = self.shared.work_dir.lock_path();
        let Some(target) = self.target.clone() else {
            self.record(EventKind::Lost, "no watcher attached");
            return Outcome::Failure;
        };

        match lock_file::read_record(&lock) {
            Ok(record) if record.token == target.token => {}
            Ok(record) => {
                self.record(
                    EventKind::Lost,
                    format!("lock now belongs to watcher {}", record.pid),
                );
                return Outcome::Failure;
            }
            Err(LockError::Missing(_)) => {
                self.record(EventKind::Lost, "lock file removed");
                return Outcome::Failure;
            }
            Err(e) => {
                self.record(EventKind::Lost, e.to_string());
                return Outcome::Failure;
            }
        }

        if !is_process_alive(target.pid) {
            self.record(EventKind::Lost, format!("watcher {} is gone", target.pid));
            lock_file::remove_if_owned(&lock, &target.token);
            return Outcome::Failure;
        }

        self.forward_trace();

        if self.ping() {
            self.liveness_deadline = Instant::now() + self.shared.config.liveness_window;
            self.report(State::Pinged);
        } else if Instant::now() >= self.liveness_deadline {
            self.record(EventKind::Timeout, "watcher not alive");
            return Outcome::Timeout;
        }

        self.sleep("ping interval", self.shared.config.ping_interval);
        Outcome::Success
    }

    fn ping(&mut self) -> bool {
        self.record(EventKind::Ping, "");
        match self.send(Command::Ping) {
            Some(reply) if reply.status == WatcherStatus::Alive => {
                self.record(
                    EventKind::PingOk,
                    reply.ping.as_deref().map(|p| excerpt(p, DETAIL_LIMIT)).unwrap_or_default(),
                );
                true
            }
            Some(reply) => {
                let detail = reply.ping.as_deref().unwrap_or(&reply.message);
                self.record(
                    EventKind::PingFail,
                    format!("{:?}: {}", reply.status, excerpt(detail, DETAIL_LIMIT)),
                );
                false
            }
            None => {
                self.record(EventKind::PingFail, "no reply");
                false
            }
        }
    }

    fn forward_trace(&mut self) {
        let pending = self
            .shared
            .trace_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(on) = pending {
            let command = if on { Command::TraceOn } else { Command::TraceOff };
            self.send(command);
        }
    }

    /// Ask the watcher to stop, then remove the lock and report STOPPED.
    ///
    /// QUIT is retried until the watcher acknowledges, the lock disappears,
    /// or the quit window closes. This runs during shutdown too, so its
    /// pauses ignore stop requests.
    fn quit(&mut self, why: &str) {
        self.record(EventKind::Quit, why);
        self.report(State::Stopping);
        let lock = self.shared.work_dir.lock_path();

        if self.target.is_none() && self.created_lock {
            self.await_late_publish();
        }

        if let Some(target) = self.target.clone() {
            let deadline = Instant::now() + self.shared.config.quit_window;
            let mut acknowledged = false;
            while Instant::now() < deadline {
                if !lock_file::is_owned_by(&lock, &target.token) {
                    self.record(EventKind::NoLock, "watcher already released its lock");
                    break;
                }
                if let Some(reply) = self.send(Command::Quit) {
                    if reply.status == WatcherStatus::Quiting {
                        acknowledged = true;
                        break;
                    }
                }
                thread::sleep(RETRY_PAUSE);
            }
            if acknowledged {
                self.record(EventKind::Quit, "watcher acknowledged");
            }
            // An unresponsive watcher exits once its lock is gone
            lock_file::remove_if_owned(&lock, &target.token);
        } else {
            self.release_created_lock();
        }

        self.set_target(None);
        self.report(State::Stopped);
    }

    /// A launch was interrupted before its watcher published the lock. Wait
    /// briefly for the record so that watcher can be told to quit too.
    fn await_late_publish(&mut self) {
        let lock = self.shared.work_dir.lock_path();
        let deadline = Instant::now() + self.shared.config.publish_wait;
        loop {
            match lock_file::read_record(&lock) {
                Ok(record) => {
                    self.created_lock = false;
                    let detail = format!("late watcher {record}");
                    self.set_target(Some(record));
                    self.record(EventKind::Attach, detail);
                    return;
                }
                Err(LockError::Empty(_)) if Instant::now() < deadline => thread::sleep(LOCK_POLL),
                Err(LockError::Empty(_)) => {
                    self.record(
                        EventKind::Alert,
                        "launched watcher did not publish its lock in time",
                    );
                    return;
                }
                // Missing or malformed: no watcher of ours to wait for
                Err(_) => return,
            }
        }
    }

    fn send(&mut self, command: Command) -> Option<Reply> {
        let port = self.target.as_ref()?.port;
        let request = Request::new(command, self.shared.unattended.load(Ordering::SeqCst));
        self.record(EventKind::Send, format!("{command} {}", request.id));

        let client = Client::new(port).with_timeout(self.shared.config.reply_timeout);
        match client.send(&request) {
            Ok(reply) => {
                self.record(
                    EventKind::Received,
                    format!("{:?} {}", reply.status, excerpt(&reply.message, DETAIL_LIMIT)),
                );
                if let Some(alert) = &reply.alert {
                    self.record(EventKind::Alert, excerpt(alert, DETAIL_LIMIT));
                }
                Some(reply)
            }
            Err(ProtocolError::Timeout(waited)) => {
                self.record(EventKind::Timeout, format!("{command}: no reply within {waited:?}"));
                None
            }
            Err(e) => {
                self.record(EventKind::Error, format!("{command}: {e}"));
                None
            }
        }
    }

    fn report(&self, state: State) {
        self.shared.set_state(state);
        self.record(EventKind::Guard, state.to_string());
        tracing::info!(dir = %self.shared.work_dir.root().display(), %state, "state change");

        match catch_unwind(AssertUnwindSafe(|| self.shared.guard.report_state(state))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.record(EventKind::Error, format!("guard rejected {state}: {e:#}")),
            Err(_) => self.record(EventKind::Error, format!("guard panicked on {state}")),
        }
    }

    fn sleep(&self, why: &str, duration: Duration) -> bool {
        self.record(EventKind::Sleep, format!("{why}: {duration:?}"));
        self.shared.shutdown.sleep(duration)
    }

    fn set_target(&mut self, record: Option<LockRecord>) {
        let (pid, port) = record.as_ref().map_or((0, 0), |r| (r.pid, r.port));
        self.shared.pid.store(pid, Ordering::SeqCst);
        self.shared.port.store(port, Ordering::SeqCst);
        self.target = record;
    }

    /// Remove the empty lock created for a launch that never got a watcher
    fn release_created_lock(&mut self) {
        if std::mem::take(&mut self.created_lock) {
            lock_file::remove_if_unchanged(&self.shared.work_dir.lock_path(), "");
        }
    }

    fn record(&self, kind: EventKind, detail: impl Into<String>) {
        self.shared.record(kind, detail);
    }
}

fn succeed(ok: bool) -> Outcome {
    if ok {
        Outcome::Success
    } else {
        Outcome::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_launch_script_quotes_paths() {
        let temp = TempDir::new().unwrap();
        let work_dir = WorkDir::create(temp.path().join("my svc")).unwrap();

        let script = launch_script(Path::new("/opt/war den/bin/warden"), &work_dir);

        assert!(script.starts_with("nohup '/opt/war den/bin/warden' watch '"));
        assert!(script.contains("my svc'"));
        assert!(script.contains("</dev/null >>'"));
        assert!(script.ends_with(" 2>&1 &"));
    }

    #[test]
    fn test_launch_script_plain_paths_stay_unquoted() {
        let temp = TempDir::new().unwrap();
        let work_dir = WorkDir::create(temp.path().join("svc")).unwrap();

        let script = launch_script(Path::new("/usr/bin/warden"), &work_dir);
        assert!(script.starts_with("nohup /usr/bin/warden watch "));
    }
}
