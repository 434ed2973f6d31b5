//! Error types for job processing.

use thiserror::Error;
use tmx_media::MediaError;
use tmx_models::ErrorCode;

/// Result type for job processing.
pub type JobResult<T> = Result<T, JobError>;

/// Errors that terminate a job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("no upload received for this job")]
    UploadMissing,

    #[error("input has no audio stream")]
    NoAudioStream,

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("artifact delivery failed: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// True when the job ended because its cancel signal fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Media(MediaError::Cancelled))
    }

    /// The protocol error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            JobError::Media(MediaError::Cancelled) => ErrorCode::JobCancelled,
            JobError::Delivery(_) => ErrorCode::OutputSendFailed,
            // Local filesystem faults are ours, not the client's.
            JobError::Io(_) | JobError::Media(MediaError::Io(_)) => ErrorCode::InternalError,
            _ => ErrorCode::JobFailed,
        }
    }
}
