//! Media normalization for outbound messages.
//!
//! Audio becomes an Opus voice note or an MP3, video becomes H.264/AAC
//! MP4 with a JPEG thumbnail, images and documents pass through after
//! validation.  Transcoding runs through the [`Transcoder`] seam; the
//! bundled implementation shells out to ffmpeg.

pub mod classify;
pub mod ffmpeg;
pub mod normalizer;
pub mod plan;

pub use ffmpeg::{FfmpegTranscoder, Transcoder};
pub use normalizer::MediaNormalizer;
pub use plan::TranscodePlan;

/// Mimetype for Opus voice notes.
pub const VOICE_NOTE_MIME: &str = "audio/ogg; codecs=opus";
pub const MP3_MIME: &str = "audio/mpeg";
pub const MP4_MIME: &str = "video/mp4";
