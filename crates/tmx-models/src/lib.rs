//! Shared protocol types for transmux.
//!
//! This crate holds everything both sides of the wire agree on:
//! - Text envelopes exchanged over the WebSocket (`message`)
//! - Operation descriptors and their validated options (`operation`)
//! - The length-prefixed binary frame codec (`frame`)
//! - The output metadata record (`metadata`)
//!
//! Nothing in here performs I/O.

pub mod codec;
pub mod frame;
pub mod message;
pub mod metadata;
pub mod operation;

pub use codec::{decode_client_message, DecodeError};
pub use frame::{decode_frame, encode_frame, FrameError, FrameHeader};
pub use message::{ClientMessage, ErrorCode, ServerMessage, StartJobMessage};
pub use metadata::MediaMetadata;
pub use operation::{
    AudioFormat, CompressOptions, CompressionPreset, ConcatOptions, ConvertOptions,
    ExtractAudioOptions, FilterOptions, FilterSpec, GifOptions, ImageFormat, InputSource,
    Operation, OperationRequest, RemoveAudioOptions, SpeedOptions, SubtitleOptions,
    ThumbnailOptions, TrimOptions,
};
