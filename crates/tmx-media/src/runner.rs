//! FFmpeg subprocess supervision.
//!
//! Spawns ffmpeg with stdin disabled, drains stdout, and reads stderr as a
//! lossy byte stream for progress events. Cancellation and timeout both
//! escalate from a graceful termination request to a forceful kill.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::ProgressTracker;

/// Longest stderr tail kept for error reporting and stats parsing.
const STDERR_TAIL_LIMIT: usize = 4096;

/// Grace between the termination request and the forceful kill.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// What a successful run leaves behind.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Bounded tail of the child's stderr, lossily decoded.
    pub stderr_tail: String,
}

/// Supervises one ffmpeg invocation at a time.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    timeout: Duration,
    kill_grace: Duration,
    progress_interval: Duration,
}

impl FfmpegRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            kill_grace: KILL_GRACE,
            progress_interval: crate::progress::DEFAULT_EMIT_INTERVAL,
        }
    }

    /// Override the grace between SIGTERM and SIGKILL.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Override the minimum interval between progress callbacks.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Run ffmpeg with the given argv.
    ///
    /// `on_progress` receives clamped, non-decreasing percentages; every
    /// invocation happens before this function returns. `input_duration`
    /// seeds the progress denominator when the caller already probed it.
    pub async fn run<F>(
        &self,
        argv: &[String],
        input_duration: Option<f64>,
        cancel: &watch::Receiver<bool>,
        mut on_progress: F,
    ) -> MediaResult<RunReport>
    where
        F: FnMut(f64) + Send,
    {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        if *cancel.borrow() {
            return Err(MediaError::Cancelled);
        }

        debug!("running ffmpeg {}", argv.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(MediaError::SpawnFailed)?;

        // Drain stdout so the child never blocks on a full pipe.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut stdout = stdout;
                let mut sink = tokio::io::sink();
                let _ = tokio::io::copy(&mut stdout, &mut sink).await;
            });
        }

        let stderr = child.stderr.take().expect("stderr piped");
        let mut reader = BufReader::new(stderr);
        let mut cancel = cancel.clone();

        let mut tracker = ProgressTracker::new(self.progress_interval);
        if let Some(secs) = input_duration {
            tracker = tracker.with_duration_secs(secs);
        }

        let deadline = Instant::now() + self.timeout;
        let mut tail = String::new();
        let mut buf: Vec<u8> = Vec::with_capacity(256);

        loop {
            buf.clear();
            tokio::select! {
                read = reader.read_until(b'\n', &mut buf) => {
                    match read {
                        Ok(0) => break, // EOF: the child is exiting
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf);
                            let line = line.trim_end_matches(['\r', '\n']);
                            push_tail(&mut tail, line);
                            if let Some(pct) = tracker.observe(line, Instant::now().into_std()) {
                                on_progress(pct);
                            }
                        }
                        Err(e) => {
                            warn!("ffmpeg stderr read error: {e}");
                            break;
                        }
                    }
                }
                _ = cancelled(&mut cancel) => {
                    self.terminate(&mut child).await;
                    return Err(MediaError::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("ffmpeg timed out after {:?}", self.timeout);
                    self.terminate(&mut child).await;
                    return Err(MediaError::Timeout(self.timeout.as_secs()));
                }
            }
        }

        // Stderr closed; wait for the exit status, still honoring
        // cancellation and the wall-clock deadline.
        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancelled(&mut cancel) => {
                self.terminate(&mut child).await;
                return Err(MediaError::Cancelled);
            }
            _ = tokio::time::sleep_until(deadline) => {
                self.terminate(&mut child).await;
                return Err(MediaError::Timeout(self.timeout.as_secs()));
            }
        };

        if status.success() {
            Ok(RunReport { stderr_tail: tail })
        } else {
            Err(MediaError::ffmpeg_failed(status.code(), tail))
        }
    }

    /// Graceful-then-forceful termination.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: sending a signal to our own child's pid.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(self.kill_grace, child.wait())
                .await
                .is_ok()
            {
                return;
            }
            warn!("ffmpeg ignored SIGTERM, killing");
        }

        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

/// Resolves when the cancel flag flips to true; pends forever if the
/// sender side is gone (cancellation can no longer fire).
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Append a line to the stderr tail, holding it at the limit after every
/// push so the tail handed to error reports never exceeds it.
fn push_tail(tail: &mut String, line: &str) {
    if !tail.is_empty() {
        tail.push('\n');
    }
    tail.push_str(line);
    if tail.len() > STDERR_TAIL_LIMIT {
        let cut = tail.len() - STDERR_TAIL_LIMIT;
        // Keep the tail aligned to a character boundary.
        let cut = (cut..tail.len())
            .find(|i| tail.is_char_boundary(*i))
            .unwrap_or(0);
        tail.replace_range(..cut, "");
    }
}

/// Check if ffmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if ffprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
