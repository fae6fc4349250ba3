//! Destination filename derivation, sanitization, and collision resolution.

use std::io::ErrorKind;
use std::path::{Component, Path};

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap};
use tracing::{debug, warn};
use url::Url;

use super::constants::MAX_CLONE_CANDIDATES;

/// Derives a filename from response headers, falling back to the URL.
///
/// Order:
/// 1. `Content-Disposition` (`filename*=` then `filename=`)
/// 2. Last non-empty URL path segment, percent-decoded
/// 3. `download_<unix-seconds><ext>`, extension guessed from `Content-Type`
#[must_use]
pub fn derive_file_name(url: &Url, headers: &HeaderMap) -> String {
    if let Some(name) = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|cd| cd.to_str().ok())
        .and_then(parse_content_disposition)
    {
        return sanitize_filename(&name);
    }

    if let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
            debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
            last.into()
        });
        return sanitize_filename(&decoded);
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let extension = headers
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .map_or(".bin", extension_from_content_type);

    format!("download_{timestamp}{extension}")
}

/// Guess file extension from Content-Type header.
pub(crate) fn extension_from_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "text/html" => ".html",
        "text/plain" => ".txt",
        "text/csv" => ".csv",
        "application/json" => ".json",
        "application/xml" | "text/xml" => ".xml",
        "application/pdf" => ".pdf",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "application/zip" => ".zip",
        "application/gzip" => ".gz",
        "video/mp4" => ".mp4",
        "audio/mpeg" => ".mp3",
        _ => ".bin",
    }
}

/// Parses Content-Disposition header to extract filename.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + 9..].trim();
    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        let name = &stripped[..end];
        return (!name.is_empty()).then(|| name.to_string());
    }
    let end = value.find(';').unwrap_or(value.len());
    let name = value[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces `/ \ : * ? " < > |` and control characters with `_`, and rewrites
/// names that would resolve to `.` or `..`.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Creates `dir` (recursively) when it does not exist.
///
/// A concurrent creator winning the race is not an error. Other failures are
/// logged and swallowed; the write that follows reports the real problem.
pub async fn ensure_directory(dir: &Path) {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return;
    }
    match tokio::fs::create_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "created destination directory"),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "could not create destination directory"),
    }
}

/// Returns `name` if no such file exists in `dir`, else the first free
/// `stem (n).ext` for `n = 1, 2, ...`.
///
/// `synchronous` selects blocking `std::fs` checks instead of `tokio::fs`.
/// The result is only guaranteed unique at the time of the check.
pub async fn resolve_available_file_name(dir: &Path, name: &str, synchronous: bool) -> String {
    if !path_exists(&dir.join(name), synchronous).await {
        return name.to_string();
    }

    let (stem, ext) = split_extension(name);
    for n in 1..=MAX_CLONE_CANDIDATES {
        let candidate = format!("{stem} ({n}){ext}");
        if !path_exists(&dir.join(&candidate), synchronous).await {
            debug!(original = %name, resolved = %candidate, "destination exists, cloning");
            return candidate;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{stem} ({timestamp}){ext}")
}

async fn path_exists(path: &Path, synchronous: bool) -> bool {
    if synchronous {
        path.exists()
    } else {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Splits `report.pdf` into (`report`, `.pdf`). Dotfiles keep their name as stem.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}
