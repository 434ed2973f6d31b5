//! Text envelopes exchanged over the WebSocket.

use serde::{Deserialize, Serialize};

use crate::metadata::MediaMetadata;
use crate::operation::{InputSource, OperationRequest};

/// Error codes surfaced in `error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidJson,
    ValidationError,
    UnknownMessageType,
    SubmitFailed,
    JobFailed,
    JobCancelled,
    CancelFailed,
    InvalidBinary,
    BinaryError,
    OutputSendFailed,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidJson => "INVALID_JSON",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            ErrorCode::SubmitFailed => "SUBMIT_FAILED",
            ErrorCode::JobFailed => "JOB_FAILED",
            ErrorCode::JobCancelled => "JOB_CANCELLED",
            ErrorCode::CancelFailed => "CANCEL_FAILED",
            ErrorCode::InvalidBinary => "INVALID_BINARY",
            ErrorCode::BinaryError => "BINARY_ERROR",
            ErrorCode::OutputSendFailed => "OUTPUT_SEND_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully decoded `start_job` request.
#[derive(Debug, Clone, PartialEq)]
pub struct StartJobMessage {
    pub job_id: String,
    pub request: OperationRequest,
    pub input: InputSource,
}

/// Messages the client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    StartJob(StartJobMessage),
    CancelJob { job_id: String },
    Ping,
}

/// Messages the server sends, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ack {
        job_id: String,
        message: String,
    },
    Progress {
        job_id: String,
        percentage: f64,
        stage: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        processing_log: Option<String>,
    },
    Completed {
        job_id: String,
        output_metadata: MediaMetadata,
        delivery_method: String,
        message: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Pong,
}

impl ServerMessage {
    /// Acknowledge an accepted job.
    pub fn ack(job_id: impl Into<String>) -> Self {
        ServerMessage::Ack {
            job_id: job_id.into(),
            message: "Job accepted and queued".to_string(),
        }
    }

    /// Progress update for a job.
    pub fn progress(job_id: impl Into<String>, percentage: f64, stage: impl Into<String>) -> Self {
        ServerMessage::Progress {
            job_id: job_id.into(),
            percentage: percentage.clamp(0.0, 100.0),
            stage: stage.into(),
            processing_log: None,
        }
    }

    /// Completion envelope; the binary artifact frame follows it.
    pub fn completed(job_id: impl Into<String>, metadata: MediaMetadata) -> Self {
        ServerMessage::Completed {
            job_id: job_id.into(),
            output_metadata: metadata,
            delivery_method: "binary".to_string(),
            message: "Job completed successfully".to_string(),
        }
    }

    /// Error envelope, optionally tied to a job.
    pub fn error(
        job_id: Option<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        ServerMessage::Error {
            job_id,
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Error envelope with extra detail.
    pub fn error_with_details(
        job_id: Option<String>,
        code: ErrorCode,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        ServerMessage::Error {
            job_id,
            code,
            message: message.into(),
            details: Some(details.into()),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong
    }

    /// True for `completed` and `error`, the last envelope a job emits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerMessage::Completed { .. } | ServerMessage::Error { .. }
        )
    }
}
