//! Input classification helpers.

use lh_domain::media::MediaHints;

/// Filename fragments that mark a recording as a voice note.
const VOICE_NAME_MARKERS: &[&str] = &["ptt-", "voice", "audio-message"];
const VOICE_EXTENSIONS: &[&str] = &["opus", "ogg", "oga"];

/// Decide whether an audio item should be delivered as a voice note.
///
/// An explicit `ptt` hint wins.  Otherwise Ogg/Opus mimetypes and
/// recorder-style file names (`PTT-20240101-WA0001.opus`, `voice.m4a`)
/// count as voice notes.
pub fn is_voice_note(hints: &MediaHints) -> bool {
    if let Some(ptt) = hints.ptt {
        return ptt;
    }
    if let Some(mime) = hints.mimetype.as_deref() {
        let mime = mime.to_ascii_lowercase();
        if mime.starts_with("audio/ogg") || mime.starts_with("audio/opus") || mime.contains("codecs=opus") {
            return true;
        }
    }
    if let Some(name) = hints.file_name.as_deref() {
        let name = name.to_ascii_lowercase();
        if VOICE_NAME_MARKERS.iter().any(|m| name.contains(m)) {
            return true;
        }
        if let Some(ext) = extension(&name) {
            return VOICE_EXTENSIONS.contains(&ext);
        }
    }
    false
}

/// Whether the item is already MP3 and can skip transcoding.
pub fn is_mp3(hints: &MediaHints) -> bool {
    let by_mime = hints
        .mimetype
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case("audio/mpeg") || m.eq_ignore_ascii_case("audio/mp3"));
    let by_name = hints
        .file_name
        .as_deref()
        .and_then(extension)
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"));
    by_mime || by_name
}

/// Lower-case extension of a file name, without the dot.
pub fn extension(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext)
}

/// Extension ffmpeg should see for the input file, so its probe has a
/// hint.  Falls back to `bin`.
pub fn input_extension(hints: &MediaHints) -> String {
    if let Some(ext) = hints.file_name.as_deref().and_then(extension) {
        return ext.to_ascii_lowercase();
    }
    let from_mime = hints
        .mimetype
        .as_deref()
        .and_then(|m| m.split(';').next())
        .and_then(|m| m.trim().rsplit_once('/'))
        .map(|(_, sub)| sub.trim_start_matches("x-").to_ascii_lowercase());
    match from_mime.as_deref() {
        Some("mpeg") => "mp3".into(),
        Some("quicktime") => "mov".into(),
        Some(sub) if !sub.is_empty() && sub.chars().all(|c| c.is_ascii_alphanumeric()) => sub.into(),
        _ => "bin".into(),
    }
}

/// Best-effort image mimetype from magic bytes.
pub fn sniff_image(data: &[u8]) -> Option<&'static str> {
    match data {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}

/// Replace (or add) the extension of a file name.
pub fn with_extension(name: &str, ext: &str) -> String {
    match extension(name) {
        Some(old) => format!("{}.{ext}", &name[..name.len() - old.len() - 1]),
        None => format!("{name}.{ext}"),
    }
}
