//! Capability probing: range support, length and file name.

use crate::error::DownloadError;
use crate::transport::{parse_url, Transport};
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH};
use reqwest::StatusCode;
use tracing::{debug, info};

/// File name used when the URL path has no usable last segment.
const FALLBACK_FILE_NAME: &str = "index.html";

/// What the server told us about the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Server advertises byte ranges and a known length.
    pub resumable: bool,
    /// Total length in bytes, when known.
    pub length: Option<u64>,
    /// Name derived from the URL path.
    pub file_name: String,
}

/// Probes `url` with a plain GET and reads its range capabilities.
///
/// Only the response head is inspected; the body is dropped unread. Any status
/// other than 200 or 206 fails with [`DownloadError::BadStatus`].
pub async fn probe(transport: &Transport, url: &str) -> Result<ProbeInfo, DownloadError> {
    let file_name = file_name_from_url(url)?;
    info!("Probing {}", url);

    let response = transport.get(url, None).await?;
    let status = response.status();
    if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
        return Err(DownloadError::BadStatus {
            status,
            url: url.to_string(),
        });
    }

    let (resumable, length) = capabilities(response.headers())?;
    debug!(
        "Probe of {}: status={}, resumable={}, length={:?}",
        url, status, resumable, length
    );

    Ok(ProbeInfo {
        resumable,
        length,
        file_name,
    })
}

/// Reads `Accept-Ranges` and `Content-Length`.
///
/// Both must be present (and ranges not refused with `none`) for the resource
/// to be resumable.
fn capabilities(headers: &HeaderMap) -> Result<(bool, Option<u64>), DownloadError> {
    let accepts_ranges = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let v = v.trim();
            !v.is_empty() && !v.eq_ignore_ascii_case("none")
        })
        .unwrap_or(false);

    let length = match headers.get(CONTENT_LENGTH) {
        Some(value) => {
            let raw = value.to_str().unwrap_or_default().trim();
            let parsed = raw.parse::<u64>().map_err(|_| DownloadError::InvalidHeader {
                name: "Content-Length",
                value: raw.to_string(),
            })?;
            Some(parsed)
        }
        None => None,
    };

    Ok((accepts_ranges && length.is_some(), length))
}

/// Last non-empty path segment of `url`, or `index.html`.
pub fn file_name_from_url(url: &str) -> Result<String, DownloadError> {
    let parsed = parse_url(url)?;
    let name = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
    Ok(name)
}
