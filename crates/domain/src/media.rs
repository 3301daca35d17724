//! Media pipeline seam.
//!
//! The lifecycle manager hands every outbound media item to a
//! [`MediaPipeline`] before it reaches the transport.  The concrete
//! transcoder lives in `lh-media`; this crate only owns the contract.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Broad media category of an outbound item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Image,
    Document,
}

/// Caller-supplied hints used for classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaHints {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    /// Explicit voice-note flag; overrides filename/mime classification.
    #[serde(default)]
    pub ptt: Option<bool>,
}

/// A raw media buffer awaiting normalization.
#[derive(Debug, Clone)]
pub struct MediaInput {
    pub kind: MediaKind,
    pub data: Vec<u8>,
    pub hints: MediaHints,
}

/// Output of the pipeline, ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMedia {
    pub kind: MediaKind,
    pub data: Vec<u8>,
    pub mimetype: String,
    /// `true` when the item should be delivered as a voice note.
    pub ptt: bool,
    pub file_name: Option<String>,
    /// JPEG thumbnail (video only).
    pub thumbnail: Option<Vec<u8>>,
}

/// Converts raw media into protocol-compatible formats.
#[async_trait::async_trait]
pub trait MediaPipeline: Send + Sync {
    async fn transform(&self, input: MediaInput) -> Result<NormalizedMedia>;
}
