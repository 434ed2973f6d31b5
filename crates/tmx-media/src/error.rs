//! Error types for media operations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while staging input or driving ffmpeg.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("ffprobe not found in PATH")]
    FfprobeNotFound,

    #[error("failed to spawn ffmpeg: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("ffmpeg exited with code {exit_code:?}")]
    FfmpegFailed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("ffprobe failed: {message}")]
    FfprobeFailed { message: String },

    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("operation cancelled")]
    Cancelled,

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("input exceeds the {0} byte size limit")]
    SizeExceeded(u64),

    #[error("URL scheme not allowed: {0}")]
    SchemeNotAllowed(String),

    #[error("loudness stats missing from analysis output")]
    LoudnessUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an ffmpeg failure error from an exit status and stderr tail.
    pub fn ffmpeg_failed(exit_code: Option<i32>, stderr_tail: impl Into<String>) -> Self {
        Self::FfmpegFailed {
            exit_code,
            stderr_tail: stderr_tail.into(),
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed(message.into())
    }

    /// True when the error was caused by the job's cancel signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }
}
