//! Bounded execution of generated scripts.
//!
//! LAUNCH, PING and STOP all run through [`run_script`]: the script gets its
//! own process group, a working directory, a hard timeout, and its combined
//! stdout/stderr is captured up to [`MAX_OUTPUT_SIZE`].

use anyhow::{Context, Result};
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

use crate::process::kill_group;

/// Time allowed for draining pipes after the script exited
const OUTPUT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(2);

/// Captured output cap per stream (64KB)
pub const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Result of running one script
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    /// Exit code, `None` when killed by a signal or on timeout
    pub exit_code: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ScriptOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Output cut to `limit` characters with an ellipsis
    pub fn output_excerpt(&self, limit: usize) -> String {
        excerpt(&self.output, limit)
    }

    pub fn summary(&self) -> String {
        if self.timed_out {
            format!("timed out after {}ms", self.duration.as_millis())
        } else {
            format!(
                "exit code {:?} after {}ms",
                self.exit_code,
                self.duration.as_millis()
            )
        }
    }
}

/// Run the script at `path` with `cwd` as working directory.
///
/// The script is executed through `/bin/sh` so it needs no shebang handling
/// or exec bit at call time. On timeout the whole process group is killed.
pub fn run_script(path: &Path, cwd: &Path, timeout: Duration) -> Result<ScriptOutcome> {
    let start = Instant::now();

    let mut child = spawn_script(path, cwd)?;

    // Drain pipes concurrently with waiting, otherwise a chatty script blocks
    // on a full pipe and never exits.
    let stdout_rx = drain(child.stdout.take());
    let stderr_rx = drain(child.stderr.take());

    let wait_result = child
        .wait_timeout(timeout)
        .with_context(|| format!("Failed to wait for script: {}", path.display()))?;

    let timed_out = wait_result.is_none();
    if timed_out {
        kill_child(&mut child);
    }

    let stdout = stdout_rx
        .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
        .unwrap_or_else(|_| "[output collection timed out]".to_string());
    let stderr = stderr_rx
        .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
        .unwrap_or_else(|_| "[output collection timed out]".to_string());

    let mut output = stdout;
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&stderr);
    }

    Ok(ScriptOutcome {
        exit_code: wait_result.and_then(|status| status.code()),
        output,
        duration: start.elapsed(),
        timed_out,
    })
}

fn spawn_script(path: &Path, cwd: &Path) -> Result<Child> {
    Command::new("/bin/sh")
        .arg(path)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .with_context(|| format!("Failed to spawn script: {}", path.display()))
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    match stream {
        Some(stream) => {
            thread::spawn(move || {
                let _ = tx.send(read_stream_to_string(stream));
            });
        }
        None => {
            let _ = tx.send(String::new());
        }
    }
    rx
}

/// Read a stream with a size cap, draining anything past the cap.
fn read_stream_to_string<R: Read>(mut stream: R) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let remaining = MAX_OUTPUT_SIZE.saturating_sub(buf.len());
                let to_copy = n.min(remaining);
                buf.extend_from_slice(&chunk[..to_copy]);
                if to_copy < n {
                    truncated = true;
                }
            }
            Err(_) => {
                if buf.is_empty() {
                    return "[error reading output]".to_string();
                }
                break;
            }
        }
    }

    if truncated {
        buf.extend_from_slice(b"\n[output truncated]");
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn kill_child(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

/// Cut `text` to at most `limit` characters, marking the cut with `...`
pub fn excerpt(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    cut
}
