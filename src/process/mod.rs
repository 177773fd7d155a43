//! Process liveness checks and signalling.
//!
//! Scripts and the watcher's child run in their own process group (the group
//! id equals the leader's pid), so terminating a group reaches everything the
//! script spawned.

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{setsid, Pid};
use std::thread;
use std::time::{Duration, Instant};

const TERMINATE_POLL: Duration = Duration::from_millis(100);

/// Check if a process with the given PID exists.
///
/// Sends the null signal. `EPERM` means the process exists but belongs to
/// someone else, which still counts as alive. PIDs that do not fit in an
/// `i32` are treated as dead.
///
/// ```ignore
/// use warden::process::is_process_alive;
///
/// assert!(is_process_alive(std::process::id()));
/// assert!(!is_process_alive(999999999));
/// ```
pub fn is_process_alive(pid: u32) -> bool {
    let Some(pid) = to_pid(pid) else {
        return false;
    };

    match kill(pid, None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => false,
    }
}

/// Send `signal` to process group `pgid`. Returns false if the group is gone.
pub fn signal_group(pgid: u32, signal: Signal) -> bool {
    // pgid 0 and 1 address our own group and init; never signal those
    let Some(pgid) = to_pid(pgid).filter(|p| p.as_raw() > 1) else {
        return false;
    };
    killpg(pgid, signal).is_ok()
}

/// SIGKILL a process group, ignoring errors
pub fn kill_group(pgid: u32) {
    signal_group(pgid, Signal::SIGKILL);
}

/// SIGTERM a process group, then SIGKILL it if the leader outlives `grace`.
///
/// Returns true if the leader exited within the grace period.
pub fn terminate_group(pgid: u32, grace: Duration) -> bool {
    if !signal_group(pgid, Signal::SIGTERM) {
        return true;
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !is_process_alive(pgid) {
            return true;
        }
        thread::sleep(TERMINATE_POLL);
    }

    tracing::warn!(pgid, "process group ignored SIGTERM, sending SIGKILL");
    kill_group(pgid);
    false
}

/// Start a new session so the caller survives its launcher's terminal and
/// process group. Already being a session leader is fine.
pub fn detach_session() {
    match setsid() {
        Ok(_) | Err(Errno::EPERM) => {}
        Err(e) => tracing::warn!(error = %e, "setsid failed"),
    }
}

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().map(Pid::from_raw)
}
