//! Inbound text-frame decoding and validation.
//!
//! Decoding is two-phase: the `type` tag is read first, then the envelope is
//! decoded against that message's schema so option mismatches are reported
//! with the right error code. A bad frame never costs the connection;
//! every failure maps to an `error` envelope.

use serde::Deserialize;
use thiserror::Error;

use crate::message::{ClientMessage, ErrorCode, StartJobMessage};
use crate::operation::{InputSource, Operation, OperationRequest};

/// Why an inbound text frame was rejected.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("message has no type field")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl DecodeError {
    /// The protocol error code this failure maps to.
    pub fn code(&self) -> ErrorCode {
        match self {
            DecodeError::InvalidJson(_) => ErrorCode::InvalidJson,
            DecodeError::MissingType | DecodeError::UnknownType(_) => {
                ErrorCode::UnknownMessageType
            }
            DecodeError::Validation(_) => ErrorCode::ValidationError,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StartJobWire {
    #[serde(rename = "type")]
    _type: String,
    job_id: String,
    operation: Operation,
    input: InputSource,
    options: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CancelJobWire {
    #[serde(rename = "type")]
    _type: String,
    job_id: String,
}

/// Decode and validate one inbound text frame.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(DecodeError::InvalidJson)?;

    let msg_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingType)?;

    match msg_type {
        "start_job" => {
            let wire: StartJobWire = serde_json::from_value(value)
                .map_err(|e| DecodeError::Validation(e.to_string()))?;
            if wire.job_id.is_empty() {
                return Err(DecodeError::Validation("job_id must not be empty".into()));
            }
            let request = OperationRequest::from_parts(wire.operation, wire.options)
                .map_err(|e| DecodeError::Validation(format!("options: {e}")))?;
            request.validate().map_err(DecodeError::Validation)?;
            Ok(ClientMessage::StartJob(StartJobMessage {
                job_id: wire.job_id,
                request,
                input: wire.input,
            }))
        }
        "cancel_job" => {
            let wire: CancelJobWire = serde_json::from_value(value)
                .map_err(|e| DecodeError::Validation(e.to_string()))?;
            Ok(ClientMessage::CancelJob {
                job_id: wire.job_id,
            })
        }
        "ping" => Ok(ClientMessage::Ping),
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::SpeedOptions;

    #[test]
    fn decodes_start_job() {
        let text = r#"{
            "type": "start_job",
            "job_id": "j1",
            "operation": "speed",
            "input": {"source": "url", "url": "http://test/v.mp4"},
            "options": {"speed_factor": 2.0, "maintain_pitch": false}
        }"#;
        let msg = decode_client_message(text).unwrap();
        match msg {
            ClientMessage::StartJob(start) => {
                assert_eq!(start.job_id, "j1");
                assert_eq!(
                    start.request,
                    OperationRequest::Speed(SpeedOptions {
                        speed_factor: 2.0,
                        maintain_pitch: false,
                    })
                );
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decodes_cancel_and_ping() {
        let cancel = decode_client_message(r#"{"type":"cancel_job","job_id":"j2"}"#).unwrap();
        assert_eq!(
            cancel,
            ClientMessage::CancelJob {
                job_id: "j2".into()
            }
        );

        let ping = decode_client_message(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
    }

    #[test]
    fn invalid_json_maps_to_code() {
        let err = decode_client_message("{").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidJson);
    }

    #[test]
    fn unknown_type_maps_to_code() {
        let err = decode_client_message(r#"{"type":"reboot"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownMessageType);

        let err = decode_client_message(r#"{"job_id":"j"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownMessageType);
    }

    #[test]
    fn bad_options_map_to_validation_error() {
        // Range violation caught by validate().
        let text = r#"{
            "type": "start_job",
            "job_id": "j1",
            "operation": "speed",
            "input": {"source": "upload"},
            "options": {"speed_factor": 99.0}
        }"#;
        let err = decode_client_message(text).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        // Schema mismatch caught at decode.
        let text = r#"{
            "type": "start_job",
            "job_id": "j1",
            "operation": "trim",
            "input": {"source": "upload"},
            "options": {"speed_factor": 2.0}
        }"#;
        let err = decode_client_message(text).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn unknown_envelope_field_rejected() {
        let text = r#"{
            "type": "start_job",
            "job_id": "j1",
            "operation": "ping_pong",
            "input": {"source": "upload"},
            "options": {}
        }"#;
        let err = decode_client_message(text).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let text = r#"{"type":"cancel_job","job_id":"j","extra":1}"#;
        let err = decode_client_message(text).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn empty_job_id_rejected() {
        let text = r#"{
            "type": "start_job",
            "job_id": "",
            "operation": "trim",
            "input": {"source": "upload"},
            "options": {"start_time": 0.0, "end_time": 1.0}
        }"#;
        let err = decode_client_message(text).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }
}
