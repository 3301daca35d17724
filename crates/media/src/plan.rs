//! ffmpeg argument plans.
//!
//! A plan is the argument list between `-i <input>` and `<output>`, plus
//! the file extensions the transcoder should use.  Keeping them as data
//! lets the normalizer be tested without ffmpeg installed.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodePlan {
    /// Human-readable name used in logs.
    pub label: &'static str,
    pub input_ext: String,
    pub output_ext: &'static str,
    pub args: Vec<String>,
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

impl TranscodePlan {
    /// Mono 48 kHz Opus in an Ogg container.
    pub fn voice_note(input_ext: String) -> Self {
        Self {
            label: "voice-note",
            input_ext,
            output_ext: "ogg",
            args: args(&[
                "-vn", "-c:a", "libopus", "-b:a", "64k", "-ac", "1", "-ar", "48000",
                "-application", "voip",
            ]),
        }
    }

    pub fn mp3(input_ext: String) -> Self {
        Self {
            label: "mp3",
            input_ext,
            output_ext: "mp3",
            args: args(&["-vn", "-c:a", "libmp3lame", "-b:a", "128k", "-ar", "44100"]),
        }
    }

    /// H.264/AAC MP4 letterboxed to `width`x`height`.
    pub fn mp4(input_ext: String, width: u32, height: u32) -> Self {
        let mut list = args(&["-vf"]);
        list.push(format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2"
        ));
        list.extend(args(&[
            "-c:v", "libx264", "-preset", "veryfast", "-crf", "28", "-pix_fmt", "yuv420p",
            "-c:a", "aac", "-b:a", "128k", "-movflags", "+faststart",
        ]));
        Self {
            label: "mp4",
            input_ext,
            output_ext: "mp4",
            args: list,
        }
    }

    /// Single JPEG frame scaled to `width`.
    pub fn thumbnail(input_ext: String, width: u32) -> Self {
        let mut list = args(&["-frames:v", "1", "-vf"]);
        list.push(format!("scale={width}:-2"));
        list.extend(args(&["-q:v", "5"]));
        Self {
            label: "thumbnail",
            input_ext,
            output_ext: "jpg",
            args: list,
        }
    }
}
