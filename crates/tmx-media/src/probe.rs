//! Media metadata via ffprobe.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::warn;

use tmx_models::MediaMetadata;

use crate::error::{MediaError, MediaResult};

/// ffprobe JSON output shape.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Probe a media file, never failing the caller.
///
/// On any probe error the returned record carries only the file size
/// (read from the filesystem); everything else stays unset.
pub async fn probe(path: impl AsRef<Path>) -> MediaMetadata {
    let path = path.as_ref();
    match try_probe(path).await {
        Ok(meta) => meta,
        Err(e) => {
            warn!(path = %path.display(), "probe failed: {e}");
            let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
            MediaMetadata::size_only(size)
        }
    }
}

/// Probe a media file, surfacing failures to the caller.
pub async fn try_probe(path: &Path) -> MediaResult<MediaMetadata> {
    if !path.exists() {
        return Err(MediaError::FfprobeFailed {
            message: format!("file not found: {}", path.display()),
        });
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

    let video = parsed.streams.iter().find(|s| s.codec_type == "video");
    let audio = parsed.streams.iter().find(|s| s.codec_type == "audio");

    let size = parsed
        .format
        .size
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    Ok(MediaMetadata {
        format: parsed
            .format
            .format_name
            .unwrap_or_else(|| "unknown".to_string()),
        duration: parsed
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| *d > 0.0),
        size_bytes: size,
        video_codec: video.and_then(|s| s.codec_name.clone()),
        audio_codec: audio.and_then(|s| s.codec_name.clone()),
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        bitrate: parsed.format.bit_rate.as_deref().and_then(|b| b.parse().ok()),
        fps: video.and_then(|s| {
            s.avg_frame_rate
                .as_deref()
                .or(s.r_frame_rate.as_deref())
                .and_then(parse_frame_rate)
        }),
    })
}

/// Parse a frame-rate fraction ("30000/1001") or plain number ("29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|f| *f > 0.0)
}
