//! Outbound message content.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lh_domain::media::{MediaHints, MediaInput, MediaKind};
use serde::{Deserialize, Serialize};

/// Content an operator asks a session to send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundContent {
    Text {
        text: String,
    },
    Media(MediaPayload),
}

/// A media attachment with its raw bytes base64-encoded on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaPayload {
    pub media_kind: MediaKind,
    /// Base64 (standard alphabet) encoded bytes.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    /// Force (or forbid) voice-note delivery for audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptt: Option<bool>,
}

impl MediaPayload {
    pub fn from_bytes(media_kind: MediaKind, bytes: &[u8]) -> Self {
        Self {
            media_kind,
            data: BASE64.encode(bytes),
            caption: None,
            file_name: None,
            mimetype: None,
            ptt: None,
        }
    }

    /// Decode the payload into a pipeline input.
    pub fn to_media_input(&self) -> Result<MediaInput, base64::DecodeError> {
        Ok(MediaInput {
            kind: self.media_kind,
            data: BASE64.decode(self.data.as_bytes())?,
            hints: MediaHints {
                file_name: self.file_name.clone(),
                mimetype: self.mimetype.clone(),
                ptt: self.ptt,
            },
        })
    }
}

/// Encode raw bytes for the wire.
pub fn encode_bytes(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}
