//! Argv-based subprocess launcher with two-tier timeouts
//!
//! Commands are always launched from an argv, never through a shell, so
//! prompt text cannot be reinterpreted as shell syntax. Two timeouts apply:
//! an idle timeout that fires when the child produces no new output, and a
//! max-total timeout on the whole run. Either one terminates the child.

use kaizen_common::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Timeouts and output bounds for one subprocess run
#[derive(Debug, Clone)]
pub struct SubprocessLimits {
    /// Kill the child after this long without new bytes on stdout/stderr
    pub idle_timeout: Duration,
    /// Kill the child after this long regardless of activity
    pub max_total: Duration,
    /// Stop buffering a stream past this many bytes
    pub max_output_bytes: usize,
}

impl Default for SubprocessLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(180),
            max_total: Duration::from_secs(600),
            max_output_bytes: 4 * 1024 * 1024, // 4MB per stream
        }
    }
}

impl SubprocessLimits {
    pub fn from_secs(idle_secs: u64, max_secs: u64) -> Self {
        Self {
            idle_timeout: Duration::from_secs(idle_secs),
            max_total: Duration::from_secs(max_secs),
            ..Self::default()
        }
    }
}

/// Captured result of a subprocess run
#[derive(Debug, Clone)]
pub struct SubprocessOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl SubprocessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status_code == Some(0)
    }

    /// stdout and stderr combined, for line-oriented error parsing
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

struct StreamBuffer {
    bytes: Vec<u8>,
    last_activity: Instant,
}

async fn drain_stream<R>(
    mut reader: R,
    buffer: Arc<Mutex<StreamBuffer>>,
    max_bytes: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut buf = buffer.lock().await;
                buf.last_activity = Instant::now();
                if buf.bytes.len() < max_bytes {
                    let take = n.min(max_bytes - buf.bytes.len());
                    buf.bytes.extend_from_slice(&chunk[..take]);
                }
            }
            Err(_) => break,
        }
    }
}

/// Run an argv as a subprocess with captured output and the configured
/// timeouts. Stdin is closed immediately. A timeout terminates the child
/// and is reported via `timed_out` rather than as an error, so callers can
/// inspect partial output.
pub async fn run_argv(
    argv: &[String],
    working_dir: &Path,
    limits: &SubprocessLimits,
) -> Result<SubprocessOutput> {
    let program = argv
        .first()
        .ok_or_else(|| Error::Subprocess("Empty command".to_string()))?;

    debug!("Running subprocess: {:?} in {}", argv, working_dir.display());
    let started = Instant::now();

    let mut child = Command::new(program)
        .args(&argv[1..])
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Subprocess(format!("Failed to spawn {}: {}", program, e)))?;

    let stdout_buf = Arc::new(Mutex::new(StreamBuffer {
        bytes: Vec::new(),
        last_activity: started,
    }));
    let stderr_buf = Arc::new(Mutex::new(StreamBuffer {
        bytes: Vec::new(),
        last_activity: started,
    }));

    let stdout_task = child.stdout.take().map(|stream| {
        tokio::spawn(drain_stream(
            stream,
            stdout_buf.clone(),
            limits.max_output_bytes,
        ))
    });
    let stderr_task = child.stderr.take().map(|stream| {
        tokio::spawn(drain_stream(
            stream,
            stderr_buf.clone(),
            limits.max_output_bytes,
        ))
    });

    let mut timed_out = false;
    let status_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {}
            Err(e) => {
                return Err(Error::Subprocess(format!(
                    "Failed to wait on {}: {}",
                    program, e
                )));
            }
        }

        tokio::time::sleep(Duration::from_millis(100)).await;

        let now = Instant::now();
        let last_activity = {
            let out = stdout_buf.lock().await.last_activity;
            let err = stderr_buf.lock().await.last_activity;
            out.max(err)
        };

        if now.duration_since(started) >= limits.max_total {
            warn!("Subprocess {} exceeded max runtime, terminating", program);
            timed_out = true;
        } else if now.duration_since(last_activity) >= limits.idle_timeout {
            warn!("Subprocess {} idle too long, terminating", program);
            timed_out = true;
        }

        if timed_out {
            let _ = child.start_kill();
            let _ = child.wait().await;
            break None;
        }
    };

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    let stdout = String::from_utf8_lossy(&stdout_buf.lock().await.bytes).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_buf.lock().await.bytes).into_owned();

    Ok(SubprocessOutput {
        status_code,
        stdout,
        stderr,
        duration: started.elapsed(),
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let out = run_argv(
            &argv(&["echo", "hello world"]),
            Path::new("."),
            &SubprocessLimits::default(),
        )
        .await
        .unwrap();

        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello world");
        assert_eq!(out.status_code, Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let out = run_argv(
            &argv(&["false"]),
            Path::new("."),
            &SubprocessLimits::default(),
        )
        .await
        .unwrap();

        assert!(!out.success());
        assert_eq!(out.status_code, Some(1));
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let result = run_argv(
            &argv(&["definitely-not-a-real-binary-kaizen"]),
            Path::new("."),
            &SubprocessLimits::default(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_max_total_timeout_terminates() {
        let limits = SubprocessLimits {
            idle_timeout: Duration::from_secs(30),
            max_total: Duration::from_millis(400),
            ..SubprocessLimits::default()
        };
        let out = run_argv(&argv(&["sleep", "5"]), Path::new("."), &limits)
            .await
            .unwrap();

        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.duration < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_idle_timeout_terminates_silent_child() {
        let limits = SubprocessLimits {
            idle_timeout: Duration::from_millis(400),
            max_total: Duration::from_secs(30),
            ..SubprocessLimits::default()
        };
        let out = run_argv(&argv(&["sleep", "5"]), Path::new("."), &limits)
            .await
            .unwrap();

        assert!(out.timed_out);
        assert!(out.duration < Duration::from_secs(4));
    }
}
