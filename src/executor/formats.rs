//! Format selectors per phase and ladder step

use crate::config::FormatPreference;
use crate::types::{DownloadOptions, OutputKind};

/// Muxed output, any container
pub const PERMISSIVE_VIDEO: &str = "bestvideo+bestaudio/best";

/// Audio-only output for music mode
pub const MUSIC: &str = "bestaudio/best";

/// Single pre-muxed file
pub const BEST: &str = "best";

const STRICT_WEBM_FIRST: &str = "bestvideo[ext=webm][height<=1080]+bestaudio[ext=webm]/bestvideo[ext=webm][height<=720]+bestaudio[ext=webm]/bestvideo[ext=mp4][height<=1080]+bestaudio[ext=m4a]/bestvideo[ext=mp4][height<=720]+bestaudio[ext=m4a]/bestvideo*+bestaudio/best";

const STRICT_MP4_FIRST: &str = "bestvideo[ext=mp4][height<=1080]+bestaudio[ext=m4a]/bestvideo[ext=mp4][height<=720]+bestaudio[ext=m4a]/bestvideo[ext=webm][height<=1080]+bestaudio[ext=webm]/bestvideo[ext=webm][height<=720]+bestaudio[ext=webm]/bestvideo*+bestaudio/best";

const AUDIO_FORMATS: &[&str] = &["mp3", "m4a", "opus", "aac", "flac", "wav", "vorbis"];
const VIDEO_CONTAINERS: &[&str] = &["mp4", "webm", "mkv", "mov"];

/// Output kind an item must produce to be accepted
pub fn expected_kind(options: &DownloadOptions) -> OutputKind {
    if options.music_mode {
        OutputKind::AudioOnly
    } else {
        OutputKind::MuxedVideo
    }
}

/// Selector for the native attempt
pub fn native_format(options: &DownloadOptions) -> &'static str {
    if options.music_mode {
        MUSIC
    } else {
        PERMISSIVE_VIDEO
    }
}

/// Selector for a fallback ladder step
pub fn ladder_format(preference: FormatPreference, options: &DownloadOptions) -> &'static str {
    if options.music_mode {
        return MUSIC;
    }
    match preference {
        FormatPreference::Strict => match options.final_format.as_deref() {
            Some("mp4") => STRICT_MP4_FIRST,
            _ => STRICT_WEBM_FIRST,
        },
        FormatPreference::Permissive => PERMISSIVE_VIDEO,
        FormatPreference::Best => BEST,
    }
}

/// Target of audio extraction in music mode
pub fn audio_format(options: &DownloadOptions) -> Option<String> {
    if !options.music_mode {
        return None;
    }
    let format = options
        .final_format
        .as_deref()
        .map(str::to_ascii_lowercase)
        .filter(|f| AUDIO_FORMATS.contains(&f.as_str()))
        .unwrap_or_else(|| "mp3".to_string());
    Some(format)
}

/// Container for merged video output
pub fn merge_format(options: &DownloadOptions) -> Option<String> {
    if options.music_mode {
        return None;
    }
    options
        .final_format
        .as_deref()
        .map(str::to_ascii_lowercase)
        .filter(|f| VIDEO_CONTAINERS.contains(&f.as_str()))
}
