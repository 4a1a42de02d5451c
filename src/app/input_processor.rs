//! Assembly of input text from URLs, an input file and/or stdin, and its
//! conversion into transfer requests.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use fetchall_core::{HttpClient, TransferRequest, destination_for, remote_filename};
use futures_util::{StreamExt, stream};
use tracing::{debug, warn};
use url::Url;

use crate::cli::Args;

/// One input line: a URL and an optional explicit destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InputEntry {
    pub(crate) url: String,
    pub(crate) destination: Option<PathBuf>,
}

/// An input that never became a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RejectedInput {
    pub(crate) input: String,
    pub(crate) reason: String,
}

/// Joins positional URLs and the input file. Stdin is read only when neither
/// was given and it is not a terminal.
pub(crate) fn collect_input_text(args: &Args) -> Result<Option<String>> {
    let mut segments = Vec::new();
    if !args.urls.is_empty() {
        segments.push(args.urls.join("\n"));
    }
    if let Some(path) = &args.input_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?;
        segments.push(text);
    }

    if segments.is_empty() && !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        if !buffer.trim().is_empty() {
            segments.push(buffer);
        }
    }

    Ok(if segments.is_empty() {
        None
    } else {
        Some(segments.join("\n"))
    })
}

/// Parses `URL` or `URL|PATH` lines, skipping blanks and `#` comments.
pub(crate) fn parse_input_text(text: &str) -> Vec<InputEntry> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once('|') {
            Some((url, path)) if !path.trim().is_empty() => InputEntry {
                url: url.trim().to_string(),
                destination: Some(PathBuf::from(path.trim())),
            },
            Some((url, _)) => InputEntry {
                url: url.trim().to_string(),
                destination: None,
            },
            None => InputEntry {
                url: line.to_string(),
                destination: None,
            },
        })
        .collect()
}

/// Parses a `Name: value` header argument.
pub(crate) fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("invalid header {raw:?}: expected \"Name: value\"");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("invalid header {raw:?}: empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Asks the server for a filename for every entry without an explicit path.
///
/// Runs before any request is built so the destination, and with it the
/// transfer key, is fixed before admission. A failed or slow HEAD keeps the
/// name derived from the URL.
pub(crate) async fn resolve_remote_names(
    entries: Vec<InputEntry>,
    output_dir: &Path,
    headers: &[(String, String)],
    client: &HttpClient,
    probe_timeout: Duration,
    concurrency: usize,
) -> Vec<InputEntry> {
    stream::iter(entries)
        .map(|entry| resolve_remote_name(entry, output_dir, headers, client, probe_timeout))
        .buffered(concurrency.max(1))
        .collect()
        .await
}

async fn resolve_remote_name(
    mut entry: InputEntry,
    output_dir: &Path,
    headers: &[(String, String)],
    client: &HttpClient,
    probe_timeout: Duration,
) -> InputEntry {
    if entry.destination.is_some() {
        return entry;
    }
    // Invalid entries are rejected later by build_requests.
    let Ok(request) = build_request(&entry, output_dir, headers) else {
        return entry;
    };

    match tokio::time::timeout(probe_timeout, client.probe(request.url(), request.headers())).await
    {
        Ok(Ok(meta)) => {
            let name = remote_filename(&meta, request.url());
            debug!(url = %request.url(), %name, "named from server response");
            entry.destination = Some(PathBuf::from(name));
        }
        Ok(Err(error)) => {
            debug!(url = %request.url(), error = %error, "no server filename, naming from URL");
        }
        Err(_) => {
            debug!(url = %request.url(), "filename probe timed out, naming from URL");
        }
    }
    entry
}

/// Builds requests in input order. Relative explicit paths resolve against
/// `output_dir`; invalid entries are returned separately instead of aborting.
pub(crate) fn build_requests(
    entries: Vec<InputEntry>,
    output_dir: &Path,
    headers: &[(String, String)],
) -> (Vec<TransferRequest>, Vec<RejectedInput>) {
    let mut requests = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();

    for entry in entries {
        match build_request(&entry, output_dir, headers) {
            Ok(request) => {
                debug!(url = %request.url(), destination = %request.destination().display(), "queued input");
                requests.push(request);
            }
            Err(error) => {
                warn!(input = %entry.url, error = %error, "skipping input");
                rejected.push(RejectedInput {
                    input: entry.url,
                    reason: error.to_string(),
                });
            }
        }
    }

    (requests, rejected)
}

fn build_request(
    entry: &InputEntry,
    output_dir: &Path,
    headers: &[(String, String)],
) -> Result<TransferRequest> {
    let url = Url::parse(&entry.url).with_context(|| format!("invalid URL {:?}", entry.url))?;
    let destination = match &entry.destination {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => output_dir.join(path),
        None => destination_for(&url, output_dir),
    };

    let mut request = TransferRequest::from_url(url, destination)?;
    for (name, value) in headers {
        request = request.with_header(name, value)?;
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_text_skips_comments_and_blanks() {
        let text = "# mirrors\n\nhttps://example.com/a.bin\n  https://example.com/b.bin  \n#https://example.com/c.bin\n";
        let entries = parse_input_text(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://example.com/a.bin");
        assert_eq!(entries[1].url, "https://example.com/b.bin");
        assert!(entries.iter().all(|entry| entry.destination.is_none()));
    }

    #[test]
    fn test_parse_input_text_destination_override() {
        let entries = parse_input_text("https://example.com/a.bin | iso/a.iso\nhttps://example.com/b.bin|");
        assert_eq!(entries[0].destination, Some(PathBuf::from("iso/a.iso")));
        assert_eq!(entries[1].url, "https://example.com/b.bin");
        assert_eq!(entries[1].destination, None);
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Authorization: Bearer a:b").unwrap(),
            ("Authorization".to_string(), "Bearer a:b".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_build_requests_resolves_destinations() {
        let out = Path::new("/data/out");
        let entries = parse_input_text(
            "https://example.com/dir/file.iso\nhttps://example.com/x|sub/y.bin\nhttps://example.com/z|/abs/z.bin",
        );
        let (requests, rejected) = build_requests(entries, out, &[]);
        assert!(rejected.is_empty());
        assert_eq!(requests[0].destination(), Path::new("/data/out/file.iso"));
        assert_eq!(requests[1].destination(), Path::new("/data/out/sub/y.bin"));
        assert_eq!(requests[2].destination(), Path::new("/abs/z.bin"));
    }

    #[test]
    fn test_build_requests_rejects_bad_input_and_keeps_going() {
        let entries = parse_input_text("not a url\nftp://example.com/f\nhttps://example.com/ok.bin");
        let (requests, rejected) = build_requests(entries, Path::new("."), &[]);
        assert_eq!(requests.len(), 1);
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].input, "not a url");
    }

    #[test]
    fn test_build_requests_applies_headers() {
        let entries = parse_input_text("https://example.com/a.bin");
        let headers = vec![("X-Token".to_string(), "abc".to_string())];
        let (requests, _) = build_requests(entries, Path::new("."), &headers);
        assert_eq!(requests[0].headers().get("x-token").unwrap(), "abc");
    }

    #[test]
    fn test_build_requests_rejects_invalid_header_value() {
        let entries = parse_input_text("https://example.com/a.bin");
        let headers = vec![("X-Bad".to_string(), "line\nbreak".to_string())];
        let (requests, rejected) = build_requests(entries, Path::new("."), &headers);
        assert!(requests.is_empty());
        assert_eq!(rejected.len(), 1);
    }
}
