//! Length-prefixed binary frame codec.
//!
//! Layout: `u32_be(header_len) || header_json_utf8 || payload_bytes`.
//! The same frame shape carries uploads (client to server) and finished
//! artifacts (server to client); only the header direction differs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metadata::MediaMetadata;

/// Upper bound on the JSON header, in bytes.
pub const MAX_HEADER_LEN: usize = 1024;

/// JSON header preceding the payload of a binary frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub job_id: String,
    pub filename: String,
    /// Echoed output metadata on result frames; never set on uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MediaMetadata>,
}

impl FrameHeader {
    pub fn new(job_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            filename: filename.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: MediaMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Errors produced while decoding a binary frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("binary frame too short ({0} bytes)")]
    TooShort(usize),

    #[error("header length {0} exceeds the {MAX_HEADER_LEN} byte limit")]
    HeaderTooLarge(usize),

    #[error("frame truncated: header claims {header_len} bytes, {available} available")]
    Truncated { header_len: usize, available: usize },

    #[error("header is not valid JSON: {0}")]
    BadHeader(#[from] serde_json::Error),

    #[error("header is missing a job_id")]
    MissingJobId,
}

/// Encode a header and payload into one binary frame.
pub fn encode_frame(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let header_json = serde_json::to_vec(header).expect("frame header serializes");
    let mut frame = Vec::with_capacity(4 + header_json.len() + payload.len());
    frame.extend_from_slice(&(header_json.len() as u32).to_be_bytes());
    frame.extend_from_slice(&header_json);
    frame.extend_from_slice(payload);
    frame
}

/// Decode a binary frame into its header and a borrowed payload slice.
pub fn decode_frame(data: &[u8]) -> Result<(FrameHeader, &[u8]), FrameError> {
    if data.len() < 4 {
        return Err(FrameError::TooShort(data.len()));
    }

    let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if header_len > MAX_HEADER_LEN {
        return Err(FrameError::HeaderTooLarge(header_len));
    }
    if data.len() < 4 + header_len {
        return Err(FrameError::Truncated {
            header_len,
            available: data.len() - 4,
        });
    }

    let header: FrameHeader = serde_json::from_slice(&data[4..4 + header_len])?;
    if header.job_id.is_empty() {
        return Err(FrameError::MissingJobId);
    }

    Ok((header, &data[4 + header_len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let header = FrameHeader::new("job-7", "clip.mp4");
        let payload = b"\x00\x01\x02binary payload";
        let frame = encode_frame(&header, payload);

        let (decoded, body) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(body, payload);
    }

    #[test]
    fn frame_round_trip_with_metadata() {
        let header = FrameHeader::new("job-7", "out.gif")
            .with_metadata(MediaMetadata::size_only(321));
        let frame = encode_frame(&header, &[]);

        let (decoded, body) = decode_frame(&frame).unwrap();
        assert_eq!(decoded.metadata.unwrap().size_bytes, 321);
        assert!(body.is_empty());
    }

    #[test]
    fn rejects_short_frame() {
        assert!(matches!(decode_frame(b"ab"), Err(FrameError::TooShort(2))));
    }

    #[test]
    fn rejects_oversized_header() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(4096u32).to_be_bytes());
        frame.extend_from_slice(&[0u8; 64]);
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameError::HeaderTooLarge(4096))
        ));
    }

    #[test]
    fn rejects_truncated_header() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(100u32).to_be_bytes());
        frame.extend_from_slice(b"{\"job_id\":\"x\"");
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_non_json_header() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(5u32).to_be_bytes());
        frame.extend_from_slice(b"hello");
        assert!(matches!(decode_frame(&frame), Err(FrameError::BadHeader(_))));
    }

    #[test]
    fn rejects_empty_job_id() {
        let header = FrameHeader::new("", "f.bin");
        let frame = encode_frame(&header, b"x");
        assert!(matches!(decode_frame(&frame), Err(FrameError::MissingJobId)));
    }
}
