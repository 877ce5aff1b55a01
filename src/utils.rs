//! File, path and URL helpers used when placing downloads

use crate::error::{Error, Result};
use crate::types::SourceItem;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Maximum number of " (n)" suffixes tried when resolving name collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Longest file stem produced by [`pretty_file_name`], in characters
const MAX_STEM_CHARS: usize = 180;

/// First free path for `path`, adding ` (1)`, ` (2)`, ... before the extension
///
/// # Examples
///
/// ```
/// use playlist_archiver::utils::unique_destination_path;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/archive-doc-example/talk.webm");
/// let unique = unique_destination_path(path).unwrap();
/// // If talk.webm exists, returns talk (1).webm; then talk (2).webm, etc.
/// # let _ = unique;
/// ```
pub fn unique_destination_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("Cannot extract file stem of {}", path.display())))?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path.parent().ok_or_else(|| {
        Error::Other(format!("Cannot extract parent directory of {}", path.display()))
    })?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let candidate = match extension {
            Some(ext) => parent.join(format!("{} ({}).{}", stem, i, ext)),
            None => parent.join(format!("{} ({})", stem, i)),
        };
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!(
            "Could not find a free name for {} after {} attempts",
            path.display(),
            MAX_RENAME_ATTEMPTS
        ),
    )))
}

/// Replace characters that are invalid in file names on common filesystems
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');
    trimmed.chars().take(MAX_STEM_CHARS).collect::<String>().trim_end().to_string()
}

/// Final file name for an item: `Title - Channel (YYYY-MM-DD).ext`
///
/// Falls back to `<item id>.ext` when the listing carried no title.
#[must_use]
pub fn pretty_file_name(item: &SourceItem, extension: Option<&str>) -> String {
    let mut stem = match item.title.as_deref().map(sanitize_filename) {
        Some(title) if !title.is_empty() => title,
        _ => sanitize_filename(&item.id),
    };

    if let Some(channel) = item.channel.as_deref().map(sanitize_filename)
        && !channel.is_empty()
        && !stem.contains(&channel)
    {
        stem = format!("{} - {}", stem, channel);
    }
    if let Some(date) = item.upload_date.as_deref().and_then(format_upload_date) {
        stem = format!("{} ({})", stem, date);
    }
    if stem.is_empty() {
        stem = "download".to_string();
    }

    match extension {
        Some(ext) if !ext.is_empty() => format!("{}.{}", stem, ext),
        _ => stem,
    }
}

/// "20250603" → "2025-06-03"
fn format_upload_date(raw: &str) -> Option<String> {
    chrono::NaiveDate::parse_from_str(raw, "%Y%m%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Move a staged file to its final path without exposing a partial file there
///
/// A plain rename is atomic within one filesystem. Across filesystems the file
/// is copied to a hidden sibling of `dest` first and then renamed into place.
pub async fn move_into_place(src: &Path, dest: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(src, dest).await {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                src = %src.display(),
                dest = %dest.display(),
                "Rename crosses filesystems; copying"
            );
        }
        Err(e) => return Err(e),
    }

    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");
    let hidden = dest.with_file_name(format!(".{}.partial", file_name));

    if let Err(e) = tokio::fs::copy(src, &hidden).await {
        let _ = tokio::fs::remove_file(&hidden).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&hidden, dest).await {
        let _ = tokio::fs::remove_file(&hidden).await;
        return Err(e);
    }
    tokio::fs::remove_file(src).await
}

/// Item ID for an ad-hoc URL
///
/// YouTube URLs yield the video ID (`youtu.be/<id>` or `?v=<id>`); anything
/// else falls back to the last path segment, then the host, made filename-safe.
pub fn item_id_from_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    if host.ends_with("youtu.be")
        && let Some(id) = url.path_segments().and_then(|mut s| s.next()).filter(|s| !s.is_empty())
    {
        return id.to_string();
    }
    if let Some((_, id)) = url.query_pairs().find(|(key, _)| key == "v")
        && !id.is_empty()
    {
        return id.into_owned();
    }
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last());
    sanitize_filename(segment.unwrap_or(host))
}

/// Whether `url` points at YouTube Music
pub fn is_music_url(url: &Url) -> bool {
    url.host_str() == Some("music.youtube.com")
}

/// Resolve `requested` against `base`, refusing anything that escapes `base`
///
/// Purely lexical: `..` components are folded without touching the
/// filesystem, and absolute paths must already lie under `base`.
pub fn resolve_within(base: &Path, requested: &Path) -> Option<PathBuf> {
    let base = normalize(base)?;
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        base.join(requested)
    };
    let resolved = normalize(&joined)?;
    resolved.starts_with(&base).then_some(resolved)
}

fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}

/// Get available disk space for a given path
///
/// Returns the bytes available to unprivileged users on the filesystem holding
/// `path`, or an IO error if the check fails.
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid NUL-terminated string, stat is zeroed before
        // the call and only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            // f_bavail counts blocks available to unprivileged users
            #[allow(clippy::useless_conversion)]
            let available = u64::from(stat.f_bavail).saturating_mul(u64::from(stat.f_frsize));
            Ok(available)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is NUL-terminated and every out pointer refers to
        // a live, aligned u64 that is only read after a successful call.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}
