//! Two-pass loudness normalization support.
//!
//! Pass 1 runs `loudnorm` in measurement mode against a null sink and prints
//! a JSON stats block on stderr. Pass 2 re-runs the filter with the measured
//! values in linear mode. Both the stats parse and the argv resolution are
//! pure functions; the job manager wires them around the two supervisor runs.

use serde::Deserialize;

use crate::error::{MediaError, MediaResult};

/// EBU R128 targets used for both passes.
pub const TARGET_I: f64 = -16.0;
pub const TARGET_TP: f64 = -1.5;
pub const TARGET_LRA: f64 = 11.0;

/// Placeholder token the synthesizer leaves in the pass-2 audio chain.
pub const PLACEHOLDER: &str = "loudnorm";

/// Measured loudness statistics from the analysis pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnormStats {
    pub input_i: f64,
    pub input_tp: f64,
    pub input_lra: f64,
    pub input_thresh: f64,
    pub target_offset: f64,
}

/// FFmpeg prints every stat as a JSON string, not a number.
#[derive(Debug, Deserialize)]
struct RawStats {
    input_i: String,
    input_tp: String,
    input_lra: String,
    input_thresh: String,
    target_offset: String,
}

/// The measurement filter for pass 1.
pub fn first_pass_filter() -> String {
    format!("loudnorm=I={TARGET_I}:TP={TARGET_TP}:LRA={TARGET_LRA}:print_format=json")
}

/// Extract the stats block from the analysis pass's stderr tail.
///
/// The JSON object is the last `{ ... }` block ffmpeg prints.
pub fn parse_stats(stderr: &str) -> MediaResult<LoudnormStats> {
    let start = stderr.rfind('{').ok_or(MediaError::LoudnessUnavailable)?;
    let end = stderr[start..]
        .find('}')
        .map(|i| start + i + 1)
        .ok_or(MediaError::LoudnessUnavailable)?;

    let raw: RawStats = serde_json::from_str(&stderr[start..end])?;
    let parse = |v: &str| -> MediaResult<f64> {
        v.trim()
            .parse()
            .map_err(|_| MediaError::LoudnessUnavailable)
    };

    Ok(LoudnormStats {
        input_i: parse(&raw.input_i)?,
        input_tp: parse(&raw.input_tp)?,
        input_lra: parse(&raw.input_lra)?,
        input_thresh: parse(&raw.input_thresh)?,
        target_offset: parse(&raw.target_offset)?,
    })
}

impl LoudnormStats {
    /// The linear-mode filter for pass 2, carrying the measured values.
    pub fn second_pass_filter(&self) -> String {
        format!(
            "loudnorm=I={TARGET_I}:TP={TARGET_TP}:LRA={TARGET_LRA}:\
             measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:\
             offset={}:linear=true",
            self.input_i, self.input_tp, self.input_lra, self.input_thresh, self.target_offset
        )
    }
}

/// Replace the placeholder in a pass-2 argv with the measured filter.
pub fn resolve(argv: &[String], stats: &LoudnormStats) -> Vec<String> {
    let mut resolved = argv.to_vec();
    let mut is_af_value = false;
    for arg in &mut resolved {
        if is_af_value {
            *arg = arg
                .split(',')
                .map(|f| {
                    if f == PLACEHOLDER {
                        stats.second_pass_filter()
                    } else {
                        f.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(",");
            is_af_value = false;
        } else {
            is_af_value = arg == "-af";
        }
    }
    resolved
}
