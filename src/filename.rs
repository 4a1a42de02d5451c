//! Destination paths derived from URLs and server responses.
//!
//! The derived name must be stable across runs: the transfer key hashes the
//! destination, so a name that changed between runs would orphan its partial
//! file. Fallbacks therefore hash the URL instead of using a timestamp.

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use url::Url;

use crate::download::RemoteMeta;
use crate::download::constants::PARTIAL_SUFFIX;

/// Returns `<output_dir>/<filename derived from url>`.
#[must_use]
pub fn destination_for(url: &Url, output_dir: &Path) -> PathBuf {
    output_dir.join(filename_from_url(url))
}

/// Returns the path bytes are written to until the transfer completes.
#[must_use]
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Last non-empty path segment, percent-decoded and sanitized.
///
/// Falls back to `download_<hash>.bin` when the URL has no usable segment.
#[must_use]
pub fn filename_from_url(url: &Url) -> String {
    if let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last)
            .map_or_else(|_| last.to_string(), std::borrow::Cow::into_owned);
        let sanitized = sanitize_filename(&decoded);
        if !sanitized.trim_matches('_').is_empty() {
            return sanitized;
        }
    }

    fallback_filename(url)
}

/// Filename the server suggests for `requested`.
///
/// Prefers the `Content-Disposition` filename, then the last segment of the
/// URL after redirects, then the usual derivation from `requested`.
#[must_use]
pub fn remote_filename(meta: &RemoteMeta, requested: &Url) -> String {
    if let Some(name) = meta
        .content_disposition
        .as_deref()
        .and_then(parse_content_disposition)
    {
        let sanitized = sanitize_filename(&name);
        if !sanitized.trim_matches('_').is_empty() {
            return sanitized;
        }
    }

    match &meta.final_url {
        Some(final_url) if final_url != requested && has_named_segment(final_url) => {
            filename_from_url(final_url)
        }
        _ => filename_from_url(requested),
    }
}

fn has_named_segment(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .is_some_and(|last| !last.is_empty())
}

/// Extracts the filename from a `Content-Disposition` value.
///
/// Handles `filename="a.pdf"`, `filename=a.pdf` and the RFC 5987
/// `filename*=UTF-8''a%20b.pdf` form, which wins when both are present.
fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + "filename*=".len()..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded = encoded[..end].trim().trim_matches('"');
            if let Ok(decoded) = urlencoding::decode(encoded)
                && !decoded.is_empty()
            {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + "filename=".len()..].trim();
    let name = if let Some(quoted) = value.strip_prefix('"') {
        &quoted[..quoted.find('"')?]
    } else {
        value[..value.find(';').unwrap_or(value.len())].trim()
    };
    (!name.is_empty()).then(|| name.to_string())
}

/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
fn sanitize_filename(name: &str) -> String {
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

fn fallback_filename(url: &Url) -> String {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let short: String = digest
        .iter()
        .take(6)
        .map(|byte| format!("{byte:02x}"))
        .collect();
    format!("download_{short}.bin")
}
