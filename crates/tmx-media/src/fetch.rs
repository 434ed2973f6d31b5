//! Streamed HTTP download for URL inputs.
//!
//! Bytes stream straight to a file inside the job's work dir with the
//! running total checked against the size cap; cancellation is observed
//! between chunks.

use std::path::{Path, PathBuf};

use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};

/// Download a URL into `dest_dir`, returning the staged file path.
///
/// Only http/https schemes are accepted. `on_progress` receives
/// `(bytes_so_far, content_length)` after every chunk.
pub async fn fetch_url<F>(
    url: &str,
    dest_dir: &Path,
    max_bytes: u64,
    cancel: &watch::Receiver<bool>,
    mut on_progress: F,
) -> MediaResult<PathBuf>
where
    F: FnMut(u64, Option<u64>) + Send,
{
    let parsed = Url::parse(url)
        .map_err(|e| MediaError::download_failed(format!("invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(MediaError::SchemeNotAllowed(other.to_string())),
    }

    let dest = dest_dir.join(format!("input.{}", extension_for(&parsed)));
    debug!(url = %parsed, dest = %dest.display(), "starting download");

    let response = reqwest::Client::new()
        .get(parsed)
        .send()
        .await
        .map_err(|e| MediaError::download_failed(e.to_string()))?
        .error_for_status()
        .map_err(|e| MediaError::download_failed(e.to_string()))?;

    let content_length = response.content_length();
    if let Some(len) = content_length {
        if len > max_bytes {
            return Err(MediaError::SizeExceeded(max_bytes));
        }
    }

    let mut file = tokio::fs::File::create(&dest).await?;
    let mut response = response;
    let mut total: u64 = 0;

    loop {
        if *cancel.borrow() {
            return Err(MediaError::Cancelled);
        }

        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => return Err(MediaError::download_failed(e.to_string())),
        };

        total += chunk.len() as u64;
        if total > max_bytes {
            return Err(MediaError::SizeExceeded(max_bytes));
        }

        file.write_all(&chunk).await?;
        on_progress(total, content_length);
    }

    file.flush().await?;
    info!(bytes = total, dest = %dest.display(), "download complete");
    Ok(dest)
}

/// Infer a file extension from the URL path; falls back to "dat".
fn extension_for(url: &Url) -> String {
    Path::new(url.path())
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "dat".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_from_url_path() {
        let url = Url::parse("http://host/videos/clip.MP4?token=abc").unwrap();
        assert_eq!(extension_for(&url), "mp4");

        let url = Url::parse("https://host/stream").unwrap();
        assert_eq!(extension_for(&url), "dat");

        let url = Url::parse("http://host/weird.na%20me").unwrap();
        assert_eq!(extension_for(&url), "dat");
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let (_tx, rx) = watch::channel(false);
        let dir = tempfile::tempdir().unwrap();
        let err = fetch_url("ftp://host/file.mp4", dir.path(), 1024, &rx, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::SchemeNotAllowed(s) if s == "ftp"));
    }

    #[tokio::test]
    async fn rejects_unparseable_url() {
        let (_tx, rx) = watch::channel(false);
        let dir = tempfile::tempdir().unwrap();
        let err = fetch_url("not a url", dir.path(), 1024, &rx, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::DownloadFailed(_)));
    }
}
