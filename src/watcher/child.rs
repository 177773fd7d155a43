//! The supervised process: START runs in its own process group so stopping it
//! reaches everything it spawned.

use anyhow::{Context, Result};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

use crate::fs::{ScriptKind, WorkDir};
use crate::process::{kill_group, signal_group};
use crate::script::run_script;
use nix::sys::signal::Signal;

pub struct WatchedChild {
    child: Child,
    pid: u32,
    started: Instant,
}

impl WatchedChild {
    /// Run the START script in `work/`. Output goes wherever ours goes.
    pub fn spawn(work_dir: &WorkDir) -> Result<Self> {
        let script = work_dir.script_path(ScriptKind::Start);
        let cwd = work_dir.ensure_work_dir()?;

        let child = Command::new("/bin/sh")
            .arg(&script)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .with_context(|| format!("Failed to run {}", script.display()))?;
        let pid = child.id();

        tracing::info!(pid, script = %script.display(), "started process");
        Ok(Self {
            child,
            pid,
            started: Instant::now(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Exit status if the process has finished
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(pid = self.pid, error = %e, "failed to poll process");
                None
            }
        }
    }

    /// Stop the process: run STOP if it is still up, then SIGTERM the group
    /// and SIGKILL it after `grace`.
    pub fn stop(mut self, work_dir: &WorkDir, stop_timeout: Duration, grace: Duration) {
        if let Some(status) = self.try_exit() {
            tracing::info!(pid = self.pid, %status, "process already exited");
            return;
        }

        if work_dir.has_script(ScriptKind::Stop) {
            let cwd = work_dir.work_path();
            match run_script(&work_dir.script_path(ScriptKind::Stop), &cwd, stop_timeout) {
                Ok(outcome) => tracing::info!(summary = %outcome.summary(), "stop script finished"),
                Err(e) => tracing::warn!(error = %e, "stop script failed"),
            }
        }

        signal_group(self.pid, Signal::SIGTERM);
        match self.child.wait_timeout(grace) {
            Ok(Some(status)) => {
                tracing::info!(pid = self.pid, %status, "process stopped");
                return;
            }
            Ok(None) => tracing::warn!(pid = self.pid, "process ignored SIGTERM, killing group"),
            Err(e) => tracing::warn!(pid = self.pid, error = %e, "failed to wait for process"),
        }

        kill_group(self.pid);
        if let Err(e) = self.child.kill() {
            tracing::warn!(pid = self.pid, error = %e, "failed to kill process");
        }
        match self.child.wait() {
            Ok(status) => tracing::info!(pid = self.pid, %status, "process killed"),
            Err(e) => tracing::warn!(pid = self.pid, error = %e, "failed to reap process"),
        }
    }
}
