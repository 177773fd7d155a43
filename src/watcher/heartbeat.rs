//! Watcher side of the heartbeat protocol.
//!
//! Answers requests on the loopback socket until QUIT arrives, the process
//! exits, the lock file stops naming this watcher, a termination signal is
//! received, or no request arrives before the unattended deadline.
//!
//! PING is answered at once from the last [`StatusCheck`] result.

use serde_json::Value;
use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::child::WatchedChild;
use super::status_check::StatusCheck;
use super::WatcherConfig;
use crate::fs::lock_file::{self, LockRecord};
use crate::fs::WorkDir;
use crate::logging::TraceSwitch;
use crate::protocol::{decode, Command, Reply, Request, WatcherStatus, MAX_DATAGRAM};

/// Why the heartbeat loop ended
#[derive(Debug)]
pub enum ExitReason {
    Quit,
    Unattended,
    LockLost,
    Interrupted,
    ProcessExited(ExitStatus),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Quit => write!(f, "quit requested"),
            ExitReason::Unattended => write!(f, "no request before the unattended deadline"),
            ExitReason::LockLost => write!(f, "lock file no longer names this watcher"),
            ExitReason::Interrupted => write!(f, "termination signal"),
            ExitReason::ProcessExited(status) => write!(f, "process exited ({status})"),
        }
    }
}

pub struct Heartbeat<'a> {
    socket: UdpSocket,
    work_dir: &'a WorkDir,
    record: &'a LockRecord,
    config: &'a WatcherConfig,
    trace: Option<&'a TraceSwitch>,
    interrupted: Arc<AtomicBool>,
    status: WatcherStatus,
    /// Pending alert, attached to the next reply
    alert: Option<String>,
}

impl<'a> Heartbeat<'a> {
    pub fn new(
        socket: UdpSocket,
        work_dir: &'a WorkDir,
        record: &'a LockRecord,
        config: &'a WatcherConfig,
    ) -> Self {
        Self {
            socket,
            work_dir,
            record,
            config,
            trace: None,
            interrupted: Arc::new(AtomicBool::new(false)),
            status: WatcherStatus::Starting,
            alert: None,
        }
    }

    pub fn with_trace(mut self, trace: Option<&'a TraceSwitch>) -> Self {
        self.trace = trace;
        self
    }

    /// Flag that ends the loop at the next poll when set
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = interrupted;
        self
    }

    pub fn run(&mut self, child: &mut WatchedChild) -> io::Result<ExitReason> {
        self.socket.set_read_timeout(Some(self.config.poll_interval))?;
        let lock = self.work_dir.lock_path();
        let mut deadline = Instant::now() + self.config.unattended;
        let mut buf = [0u8; MAX_DATAGRAM];
        let check = StatusCheck::spawn(
            self.work_dir.clone(),
            self.config.status_timeout,
            self.config.poll_interval,
        )?;

        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                return Ok(ExitReason::Interrupted);
            }
            if let Some(status) = child.try_exit() {
                return Ok(ExitReason::ProcessExited(status));
            }
            if !lock_file::is_owned_by(&lock, &self.record.token) {
                return Ok(ExitReason::LockLost);
            }
            if Instant::now() >= deadline {
                return Ok(ExitReason::Unattended);
            }

            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    continue
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if !from.ip().is_loopback() {
                tracing::warn!(%from, "ignoring request from non-loopback address");
                self.alert = Some(format!("ignored request from {from}"));
                continue;
            }

            let request = match decode::<Request>(&buf[..len]) {
                Ok(request) => request,
                Err(e) => {
                    self.reject(&buf[..len], from, &e.to_string());
                    continue;
                }
            };

            let wait = match request.next {
                0 => self.config.unattended,
                secs => Duration::from_secs(u64::from(secs)),
            };
            deadline = Instant::now() + wait;
            tracing::debug!(command = %request.command, id = %request.id, "request");

            // The process may have exited while we were blocked in recv
            if let Some(status) = child.try_exit() {
                self.status = WatcherStatus::Quiting;
                let reply = Reply {
                    id: request.id,
                    status: self.status,
                    message: format!("process exited ({status})"),
                    alert: self.alert.take(),
                    ping: None,
                };
                self.send(&reply, from);
                return Ok(ExitReason::ProcessExited(status));
            }

            let quit = request.command == Command::Quit;
            let reply = self.handle(request, child.uptime(), &check);
            self.send(&reply, from);
            if quit {
                return Ok(ExitReason::Quit);
            }
        }
    }

    fn handle(&mut self, request: Request, uptime: Duration, check: &StatusCheck) -> Reply {
        let mut ping = None;
        let message = match request.command {
            Command::Ping if uptime < self.config.settle => {
                self.status = WatcherStatus::Starting;
                "process is starting".to_string()
            }
            Command::Ping => {
                let latest = check.latest();
                self.status = latest.status;
                ping = latest.detail;
                String::new()
            }
            Command::Quit => {
                self.status = WatcherStatus::Quiting;
                "stopping".to_string()
            }
            Command::TraceOn | Command::TraceOff => {
                let on = request.command == Command::TraceOn;
                match self.trace {
                    Some(switch) => {
                        switch.set_verbose(on);
                        format!("trace {}", if on { "on" } else { "off" })
                    }
                    None => "trace switching unavailable".to_string(),
                }
            }
        };

        Reply {
            id: request.id,
            status: self.status,
            message,
            alert: self.alert.take(),
            ping,
        }
    }

    /// Answer a request that could not be decoded, if it carries an id
    fn reject(&mut self, bytes: &[u8], from: SocketAddr, reason: &str) {
        tracing::warn!(%from, reason, "unrecognized request");
        let id = serde_json::from_slice::<Value>(bytes)
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string));

        let alert = format!("unrecognized request: {reason}");
        match id {
            Some(id) => {
                let reply = Reply {
                    id,
                    status: self.status,
                    message: String::new(),
                    alert: Some(alert),
                    ping: None,
                };
                self.send(&reply, from);
            }
            None => self.alert = Some(alert),
        }
    }

    fn send(&self, reply: &Reply, to: SocketAddr) {
        let result = reply
            .to_datagram()
            .map_err(io::Error::other)
            .and_then(|data| self.socket.send_to(&data, to));
        if let Err(e) = result {
            tracing::warn!(%to, error = %e, "failed to send reply");
        }
    }
}
