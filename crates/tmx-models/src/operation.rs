//! Operation descriptors and per-operation options.
//!
//! Options structs mirror the wire schema one-to-one and reject unknown
//! fields. Range checks that cannot be expressed in the type system live in
//! `validate()`; the codec runs them before a job is accepted.

use serde::{Deserialize, Serialize};

/// Recognized sample rates for audio extraction.
pub const SAMPLE_RATES: [u32; 6] = [8000, 16000, 22050, 44100, 48000, 96000];

/// The closed set of supported operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Speed,
    Compress,
    ExtractAudio,
    RemoveAudio,
    Convert,
    Thumbnail,
    Trim,
    Concat,
    Gif,
    Filter,
    ExtractSubtitles,
    BurnSubtitles,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Speed => "speed",
            Operation::Compress => "compress",
            Operation::ExtractAudio => "extract_audio",
            Operation::RemoveAudio => "remove_audio",
            Operation::Convert => "convert",
            Operation::Thumbnail => "thumbnail",
            Operation::Trim => "trim",
            Operation::Concat => "concat",
            Operation::Gif => "gif",
            Operation::Filter => "filter",
            Operation::ExtractSubtitles => "extract_subtitles",
            Operation::BurnSubtitles => "burn_subtitles",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the job input comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InputSource {
    /// Input arrives as a binary frame correlated by job id.
    Upload {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// Input is streamed from an HTTP(S) URL.
    Url { url: String },
}

/// An operation paired with its validated options.
///
/// Serializes to the wire shape `{"operation": "...", "options": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "options", rename_all = "snake_case")]
pub enum OperationRequest {
    Speed(SpeedOptions),
    Compress(CompressOptions),
    ExtractAudio(ExtractAudioOptions),
    RemoveAudio(RemoveAudioOptions),
    Convert(ConvertOptions),
    Thumbnail(ThumbnailOptions),
    Trim(TrimOptions),
    Concat(ConcatOptions),
    Gif(GifOptions),
    Filter(FilterOptions),
    ExtractSubtitles(SubtitleOptions),
    BurnSubtitles(SubtitleOptions),
}

impl OperationRequest {
    /// Build a request from a raw operation tag and an options document.
    ///
    /// The options document is decoded against the schema for that specific
    /// operation, so mismatched or unknown fields are reported precisely.
    pub fn from_parts(
        operation: Operation,
        options: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match operation {
            Operation::Speed => OperationRequest::Speed(serde_json::from_value(options)?),
            Operation::Compress => OperationRequest::Compress(serde_json::from_value(options)?),
            Operation::ExtractAudio => {
                OperationRequest::ExtractAudio(serde_json::from_value(options)?)
            }
            Operation::RemoveAudio => {
                OperationRequest::RemoveAudio(serde_json::from_value(options)?)
            }
            Operation::Convert => OperationRequest::Convert(serde_json::from_value(options)?),
            Operation::Thumbnail => OperationRequest::Thumbnail(serde_json::from_value(options)?),
            Operation::Trim => OperationRequest::Trim(serde_json::from_value(options)?),
            Operation::Concat => OperationRequest::Concat(serde_json::from_value(options)?),
            Operation::Gif => OperationRequest::Gif(serde_json::from_value(options)?),
            Operation::Filter => OperationRequest::Filter(serde_json::from_value(options)?),
            Operation::ExtractSubtitles => {
                OperationRequest::ExtractSubtitles(serde_json::from_value(options)?)
            }
            Operation::BurnSubtitles => {
                OperationRequest::BurnSubtitles(serde_json::from_value(options)?)
            }
        })
    }

    /// The operation tag for this request.
    pub fn operation(&self) -> Operation {
        match self {
            OperationRequest::Speed(_) => Operation::Speed,
            OperationRequest::Compress(_) => Operation::Compress,
            OperationRequest::ExtractAudio(_) => Operation::ExtractAudio,
            OperationRequest::RemoveAudio(_) => Operation::RemoveAudio,
            OperationRequest::Convert(_) => Operation::Convert,
            OperationRequest::Thumbnail(_) => Operation::Thumbnail,
            OperationRequest::Trim(_) => Operation::Trim,
            OperationRequest::Concat(_) => Operation::Concat,
            OperationRequest::Gif(_) => Operation::Gif,
            OperationRequest::Filter(_) => Operation::Filter,
            OperationRequest::ExtractSubtitles(_) => Operation::ExtractSubtitles,
            OperationRequest::BurnSubtitles(_) => Operation::BurnSubtitles,
        }
    }

    /// Run the range checks for the contained options.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            OperationRequest::Speed(o) => o.validate(),
            OperationRequest::Compress(o) => o.validate(),
            OperationRequest::ExtractAudio(o) => o.validate(),
            OperationRequest::RemoveAudio(_) => Ok(()),
            OperationRequest::Convert(o) => o.validate(),
            OperationRequest::Thumbnail(o) => o.validate(),
            OperationRequest::Trim(o) => o.validate(),
            OperationRequest::Concat(o) => o.validate(),
            OperationRequest::Gif(o) => o.validate(),
            OperationRequest::Filter(o) => o.validate(),
            OperationRequest::ExtractSubtitles(_) | OperationRequest::BurnSubtitles(_) => Ok(()),
        }
    }
}

/// Video compression quality presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompressionPreset {
    Low,
    #[default]
    Medium,
    High,
    Custom,
}

/// Supported audio output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Aac,
    Wav,
    Opus,
    M4a,
    Flac,
    Ogg,
}

impl AudioFormat {
    /// File extension for this format (without the dot).
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "aac",
            AudioFormat::Wav => "wav",
            AudioFormat::Opus => "opus",
            AudioFormat::M4a => "m4a",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
        }
    }

    /// The ffmpeg encoder used for this format.
    pub fn codec(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Aac | AudioFormat::M4a => "aac",
            AudioFormat::Wav => "pcm_s16le",
            AudioFormat::Opus => "libopus",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "libvorbis",
        }
    }
}

/// Supported thumbnail image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Jpg,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Jpg => "jpg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeedOptions {
    /// Speed multiplier, 0.25x to 10x.
    pub speed_factor: f64,
    /// Keep the audio pitch constant while changing speed.
    #[serde(default)]
    pub maintain_pitch: bool,
}

impl SpeedOptions {
    pub fn validate(&self) -> Result<(), String> {
        // Open at the bottom: exactly 0.25 is rejected.
        if !(self.speed_factor > 0.25 && self.speed_factor <= 10.0) {
            return Err(format!(
                "speed_factor must be greater than 0.25 and at most 10.0, got {}",
                self.speed_factor
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CompressOptions {
    #[serde(default)]
    pub preset: CompressionPreset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate_kbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate_kbps: Option<u32>,
    /// Constant rate factor, 0 (lossless) to 51.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crf: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
    /// Target container; defaults to mp4.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_format: Option<String>,
}

impl CompressOptions {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(crf) = self.crf {
            if crf > 51 {
                return Err(format!("crf must be between 0 and 51, got {crf}"));
            }
        }
        for (name, v) in [
            ("video_bitrate_kbps", self.video_bitrate_kbps),
            ("audio_bitrate_kbps", self.audio_bitrate_kbps),
            ("max_width", self.max_width),
            ("max_height", self.max_height),
        ] {
            if v == Some(0) {
                return Err(format!("{name} must be greater than zero"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ExtractAudioOptions {
    #[serde(default)]
    pub format: AudioFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

impl ExtractAudioOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.bitrate_kbps == Some(0) {
            return Err("bitrate_kbps must be greater than zero".into());
        }
        if let Some(rate) = self.sample_rate {
            if !SAMPLE_RATES.contains(&rate) {
                return Err(format!("unsupported sample rate {rate}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveAudioOptions {
    /// Copy the video stream instead of re-encoding.
    #[serde(default = "default_true")]
    pub keep_video_quality: bool,
}

impl Default for RemoveAudioOptions {
    fn default() -> Self {
        Self {
            keep_video_quality: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConvertOptions {
    /// Target container (mp4, mkv, webm, ...).
    pub target_format: String,
    /// Copy streams without re-encoding when possible.
    #[serde(default = "default_true")]
    pub stream_copy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
}

impl ConvertOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.target_format.trim().is_empty() {
            return Err("target_format must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ThumbnailOptions {
    /// Timestamp in seconds for a single thumbnail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Number of evenly spaced thumbnails (1-20).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl ThumbnailOptions {
    pub fn validate(&self) -> Result<(), String> {
        match (self.timestamp, self.count) {
            (Some(_), Some(_)) => {
                return Err("specify either timestamp or count, not both".into());
            }
            (None, None) => {
                return Err("either timestamp or count is required".into());
            }
            (Some(ts), None) if ts < 0.0 => {
                return Err("timestamp must not be negative".into());
            }
            (None, Some(n)) if !(1..=20).contains(&n) => {
                return Err(format!("count must be between 1 and 20, got {n}"));
            }
            _ => {}
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err("width and height must be greater than zero".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrimOptions {
    /// Start time in seconds.
    pub start_time: f64,
    /// End time in seconds; must be greater than start_time.
    pub end_time: f64,
}

impl TrimOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.start_time < 0.0 {
            return Err("start_time must not be negative".into());
        }
        if self.end_time <= self.start_time {
            return Err("end_time must be greater than start_time".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcatOptions {
    /// Number of files named by the staged concat list (2-50).
    pub file_count: u32,
    /// Re-encode instead of stream-copying; needed when sources disagree on
    /// codec parameters.
    #[serde(default)]
    pub reencode: bool,
}

impl ConcatOptions {
    pub fn validate(&self) -> Result<(), String> {
        if !(2..=50).contains(&self.file_count) {
            return Err(format!(
                "file_count must be between 2 and 50, got {}",
                self.file_count
            ));
        }
        Ok(())
    }
}

fn default_gif_fps() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GifOptions {
    pub start_time: f64,
    /// Clip duration in seconds, at most 30.
    pub duration: f64,
    #[serde(default = "default_gif_fps")]
    pub fps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Use the palette pipeline for smaller, better-looking output.
    #[serde(default = "default_true")]
    pub optimize: bool,
}

impl GifOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.start_time < 0.0 {
            return Err("start_time must not be negative".into());
        }
        if !(self.duration > 0.0 && self.duration <= 30.0) {
            return Err(format!(
                "duration must be in (0, 30] seconds, got {}",
                self.duration
            ));
        }
        if !(1..=30).contains(&self.fps) {
            return Err(format!("fps must be between 1 and 30, got {}", self.fps));
        }
        if self.width == Some(0) {
            return Err("width must be greater than zero".into());
        }
        Ok(())
    }
}

/// One entry in an ordered filter chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSpec {
    Scale {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<i32>,
    },
    /// Rotation angle in degrees.
    Rotate { angle: f64 },
    Crop {
        width: u32,
        height: u32,
        #[serde(default)]
        x: u32,
        #[serde(default)]
        y: u32,
    },
    Fps { fps: u32 },
    /// Volume multiplier (1.0 = unchanged).
    Volume { volume: f64 },
    /// Two-pass loudness normalization; overrides volume in the same chain.
    Normalize,
}

impl FilterSpec {
    /// Whether this filter applies to the audio chain.
    pub fn is_audio(&self) -> bool {
        matches!(self, FilterSpec::Volume { .. } | FilterSpec::Normalize)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterOptions {
    pub filters: Vec<FilterSpec>,
}

impl FilterOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.filters.is_empty() {
            return Err("filters must not be empty".into());
        }
        for f in &self.filters {
            match f {
                FilterSpec::Scale { width, height } => {
                    if width.is_none() && height.is_none() {
                        return Err("scale filter needs a width or a height".into());
                    }
                }
                FilterSpec::Crop { width, height, .. } => {
                    if *width == 0 || *height == 0 {
                        return Err("crop dimensions must be greater than zero".into());
                    }
                }
                FilterSpec::Fps { fps } => {
                    if *fps == 0 {
                        return Err("fps must be greater than zero".into());
                    }
                }
                FilterSpec::Volume { volume } => {
                    if *volume < 0.0 {
                        return Err("volume must not be negative".into());
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// True when the chain asks for loudness normalization.
    pub fn wants_normalize(&self) -> bool {
        self.filters.iter().any(|f| matches!(f, FilterSpec::Normalize))
    }
}

fn default_subtitle_format() -> String {
    "srt".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubtitleOptions {
    /// Subtitle stream index within the input.
    #[serde(default)]
    pub subtitle_index: u32,
    #[serde(default = "default_subtitle_format")]
    pub format: String,
}

impl Default for SubtitleOptions {
    fn default() -> Self {
        Self {
            subtitle_index: 0,
            format: default_subtitle_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_round_trips_as_snake_case() {
        let json = serde_json::to_string(&Operation::ExtractAudio).unwrap();
        assert_eq!(json, "\"extract_audio\"");
        let op: Operation = serde_json::from_str("\"burn_subtitles\"").unwrap();
        assert_eq!(op, Operation::BurnSubtitles);
    }

    #[test]
    fn speed_factor_bounds() {
        let ok = SpeedOptions {
            speed_factor: 2.0,
            maintain_pitch: false,
        };
        assert!(ok.validate().is_ok());

        let too_fast = SpeedOptions {
            speed_factor: 10.5,
            maintain_pitch: false,
        };
        assert!(too_fast.validate().is_err());

        let too_slow = SpeedOptions {
            speed_factor: 0.1,
            maintain_pitch: true,
        };
        assert!(too_slow.validate().is_err());

        // The lower bound is exclusive, the upper bound inclusive.
        let at_lower = SpeedOptions {
            speed_factor: 0.25,
            maintain_pitch: false,
        };
        assert!(at_lower.validate().is_err());

        let at_upper = SpeedOptions {
            speed_factor: 10.0,
            maintain_pitch: false,
        };
        assert!(at_upper.validate().is_ok());
    }

    #[test]
    fn thumbnail_timestamp_xor_count() {
        let both = ThumbnailOptions {
            timestamp: Some(1.0),
            count: Some(3),
            ..Default::default()
        };
        assert!(both.validate().is_err());

        let neither = ThumbnailOptions::default();
        assert!(neither.validate().is_err());

        let count_only = ThumbnailOptions {
            count: Some(5),
            ..Default::default()
        };
        assert!(count_only.validate().is_ok());

        let out_of_range = ThumbnailOptions {
            count: Some(21),
            ..Default::default()
        };
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn trim_requires_end_after_start() {
        let bad = TrimOptions {
            start_time: 5.0,
            end_time: 5.0,
        };
        assert!(bad.validate().is_err());

        let ok = TrimOptions {
            start_time: 1.0,
            end_time: 2.5,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn sample_rate_must_be_recognized() {
        let bad = ExtractAudioOptions {
            sample_rate: Some(12345),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let ok = ExtractAudioOptions {
            sample_rate: Some(44100),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn options_reject_unknown_fields() {
        let err = serde_json::from_str::<SpeedOptions>(
            r#"{"speed_factor": 2.0, "bogus": true}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn request_from_parts_matches_schema() {
        let req = OperationRequest::from_parts(
            Operation::Gif,
            serde_json::json!({"start_time": 0.0, "duration": 3.0}),
        )
        .unwrap();
        match req {
            OperationRequest::Gif(o) => {
                assert_eq!(o.fps, 10);
                assert!(o.optimize);
            }
            other => panic!("unexpected request: {other:?}"),
        }

        // Options belonging to a different operation are rejected.
        let err = OperationRequest::from_parts(
            Operation::Trim,
            serde_json::json!({"speed_factor": 2.0}),
        );
        assert!(err.is_err());
    }

    #[test]
    fn filter_chain_round_trip() {
        let opts = FilterOptions {
            filters: vec![
                FilterSpec::Scale {
                    width: Some(1280),
                    height: None,
                },
                FilterSpec::Rotate { angle: 90.0 },
                FilterSpec::Normalize,
            ],
        };
        let json = serde_json::to_string(&opts).unwrap();
        let back: FilterOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
        assert!(back.wants_normalize());
    }

    #[test]
    fn input_source_tagging() {
        let url: InputSource =
            serde_json::from_str(r#"{"source":"url","url":"https://e.test/v.mp4"}"#).unwrap();
        assert_eq!(
            url,
            InputSource::Url {
                url: "https://e.test/v.mp4".to_string()
            }
        );

        let upload: InputSource = serde_json::from_str(r#"{"source":"upload"}"#).unwrap();
        assert_eq!(upload, InputSource::Upload { filename: None });
    }
}
