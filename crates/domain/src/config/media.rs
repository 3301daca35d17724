use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Media transcoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path (or bare name resolved via `PATH`) of the ffmpeg binary.
    #[serde(default = "d_ffmpeg")]
    pub ffmpeg_path: String,
    /// Inputs larger than this are rejected before transcoding.
    #[serde(default = "d_max_bytes")]
    pub max_bytes: usize,
    /// Target video width (must be even).
    #[serde(default = "d_width")]
    pub video_width: u32,
    /// Target video height (must be even).
    #[serde(default = "d_height")]
    pub video_height: u32,
    /// Hard timeout for a single ffmpeg invocation.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: d_ffmpeg(),
            max_bytes: d_max_bytes(),
            video_width: d_width(),
            video_height: d_height(),
            timeout_secs: d_timeout(),
        }
    }
}

fn d_ffmpeg() -> String {
    "ffmpeg".into()
}
fn d_max_bytes() -> usize {
    64 * 1024 * 1024
}
fn d_width() -> u32 {
    640
}
fn d_height() -> u32 {
    360
}
fn d_timeout() -> u64 {
    120
}
