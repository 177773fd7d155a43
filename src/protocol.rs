//! Heartbeat protocol between supervisor and watcher.
//!
//! One JSON request per UDP datagram to `127.0.0.1:<port>`, one JSON reply back
//! to the sender. The sender waits up to [`REPLY_TIMEOUT`] and never
//! retransmits; retry policy belongs to the caller.
//!
//! Requests are idempotent except QUIT, which may run the stop script twice if
//! retried. Stop scripts must tolerate that.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::script::excerpt;

/// Largest datagram either side sends or accepts
pub const MAX_DATAGRAM: usize = 1400;

/// How long a sender waits for the reply
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("message of {0} bytes exceeds the datagram limit")]
    Oversize(usize),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("nothing is listening on the watcher port")]
    Refused,
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Ping,
    Quit,
    TraceOn,
    TraceOff,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Ping => "PING",
            Command::Quit => "QUIT",
            Command::TraceOn => "TRACE_ON",
            Command::TraceOff => "TRACE_OFF",
        };
        f.write_str(name)
    }
}

/// Watcher's view of its child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatcherStatus {
    /// No status check has completed yet
    Starting,
    /// Status script succeeded, or there is none
    Alive,
    /// Status script failed or timed out
    Uncertain,
    /// Watcher is shutting down
    Quiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    pub id: String,
    /// Seconds until the next expected contact; 0 selects the watcher default
    #[serde(default)]
    pub next: u32,
}

impl Request {
    pub fn new(command: Command, next: u32) -> Self {
        Self {
            command,
            id: Uuid::new_v4().simple().to_string(),
            next,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub status: WatcherStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub alert: Option<String>,
    #[serde(default)]
    pub ping: Option<String>,
}

impl Reply {
    /// Encode, shortening `alert` and `ping` until the reply fits a datagram
    pub fn to_datagram(&self) -> Result<Vec<u8>, ProtocolError> {
        match encode(self) {
            Err(ProtocolError::Oversize(_)) => {}
            other => return other,
        }

        let mut shortened = self.clone();
        for limit in [400, 100, 0] {
            shortened.alert = self.alert.as_deref().map(|a| excerpt(a, limit));
            shortened.ping = self.ping.as_deref().map(|p| excerpt(p, limit));
            shortened.message = excerpt(&self.message, limit);
            match encode(&shortened) {
                Err(ProtocolError::Oversize(_)) => continue,
                other => return other,
            }
        }
        Err(ProtocolError::Oversize(MAX_DATAGRAM + 1))
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
    if bytes.len() > MAX_DATAGRAM {
        return Err(ProtocolError::Oversize(bytes.len()));
    }
    Ok(bytes)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
}

/// Sends requests to one watcher port
#[derive(Debug, Clone)]
pub struct Client {
    port: u16,
    timeout: Duration,
}

impl Client {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            timeout: REPLY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send one request and wait for the matching reply.
    ///
    /// Replies carrying a different id are leftovers from an earlier request
    /// that timed out; they are skipped.
    pub fn send(&self, request: &Request) -> Result<Reply, ProtocolError> {
        let data = encode(request)?;

        // Connecting lets the kernel report ICMP port-unreachable as
        // ECONNREFUSED instead of a silent timeout.
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        socket.connect((Ipv4Addr::LOCALHOST, self.port))?;
        socket.send(&data).map_err(classify)?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProtocolError::Timeout(self.timeout));
            }
            socket.set_read_timeout(Some(remaining))?;

            let len = match socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e) => {
                    return Err(match classify(e) {
                        ProtocolError::Timeout(_) => ProtocolError::Timeout(self.timeout),
                        other => other,
                    })
                }
            };

            let reply: Reply = decode(&buf[..len])?;
            if reply.id == request.id {
                return Ok(reply);
            }
            tracing::debug!(expected = %request.id, got = %reply.id, "skipping stale reply");
        }
    }
}

fn classify(e: io::Error) -> ProtocolError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ProtocolError::Timeout(REPLY_TIMEOUT),
        io::ErrorKind::ConnectionRefused => ProtocolError::Refused,
        _ => ProtocolError::Io(e),
    }
}
