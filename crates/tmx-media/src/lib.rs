//! FFmpeg integration for transmux.
//!
//! This crate provides:
//! - A pure command synthesizer compiling operation requests into argv plans
//! - A subprocess supervisor with stderr progress parsing, timeout and
//!   graceful-then-forceful cancellation
//! - An ffprobe metadata probe that never fails a job
//! - A streamed, size-capped HTTP fetch for URL inputs
//! - Two-pass loudness measurement for the normalize filter path

pub mod error;
pub mod fetch;
pub mod loudnorm;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod synth;

pub use error::{MediaError, MediaResult};
pub use fetch::fetch_url;
pub use loudnorm::LoudnormStats;
pub use probe::probe;
pub use progress::ProgressTracker;
pub use runner::{check_ffmpeg, check_ffprobe, FfmpegRunner, RunReport};
pub use synth::{synthesize, CommandPlan, PlanOutput, PlanStep, SynthProbe};
