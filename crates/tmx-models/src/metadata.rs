//! Output metadata record.

use serde::{Deserialize, Serialize};

/// Media file metadata as reported to clients on completion.
///
/// Only `format` and `size_bytes` are always present; everything else
/// depends on what the prober could see. A probe failure still yields a
/// usable record via [`MediaMetadata::size_only`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// Container format name (e.g. "mov,mp4,m4a,3gp,3g2,mj2").
    pub format: String,
    /// Duration in seconds, when the container reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// File size in bytes.
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Overall bitrate in bits per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
}

impl MediaMetadata {
    /// Fallback record when probing fails: size is all we know.
    pub fn size_only(size_bytes: u64) -> Self {
        Self {
            format: "unknown".to_string(),
            duration: None,
            size_bytes,
            video_codec: None,
            audio_codec: None,
            width: None,
            height: None,
            bitrate: None,
            fps: None,
        }
    }

    /// Whether the record describes a stream with audio.
    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }
}
