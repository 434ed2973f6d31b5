//! Input staging: URL download or upload rendezvous.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use tmx_media::{fetch_url, MediaError};
use tmx_models::operation::InputSource;

use crate::error::{JobError, JobResult};
use crate::job::{Job, UploadPayload};

/// Limits applied while staging.
#[derive(Debug, Clone, Copy)]
pub struct StageLimits {
    pub max_bytes: u64,
    pub upload_timeout: Duration,
}

/// Materialize the job's input inside `work_dir` and return its path.
///
/// Progress lands in the 0-5% band of the overall job.
pub async fn stage<F>(
    job: &Job,
    work_dir: &Path,
    limits: StageLimits,
    cancel: &watch::Receiver<bool>,
    mut on_progress: F,
) -> JobResult<PathBuf>
where
    F: FnMut(f64) + Send,
{
    match &job.input {
        InputSource::Url { url } => {
            debug!(job_id = %job.id, url = %url, "staging from URL");
            let path = fetch_url(url, work_dir, limits.max_bytes, cancel, |done, total| {
                if let Some(total) = total {
                    if total > 0 {
                        on_progress((done as f64 / total as f64) * 5.0);
                    }
                }
            })
            .await?;
            Ok(path)
        }
        InputSource::Upload { .. } => {
            let rx = job.take_upload_rx().ok_or(JobError::UploadMissing)?;
            let payload = wait_for_upload(rx, limits.upload_timeout, cancel).await?;

            if payload.bytes.len() as u64 > limits.max_bytes {
                return Err(MediaError::SizeExceeded(limits.max_bytes).into());
            }

            let filename = sanitize_filename(&payload.filename);
            let path = work_dir.join(filename);
            tokio::fs::write(&path, &payload.bytes).await?;
            info!(
                job_id = %job.id,
                bytes = payload.bytes.len(),
                path = %path.display(),
                "staged upload"
            );
            on_progress(5.0);
            Ok(path)
        }
    }
}

/// Block on the upload rendezvous until the payload, a timeout, or the
/// cancel signal.
async fn wait_for_upload(
    rx: oneshot::Receiver<UploadPayload>,
    timeout: Duration,
    cancel: &watch::Receiver<bool>,
) -> JobResult<UploadPayload> {
    let mut cancel = cancel.clone();
    tokio::select! {
        payload = rx => payload.map_err(|_| JobError::UploadMissing),
        _ = tokio::time::sleep(timeout) => Err(JobError::UploadMissing),
        _ = wait_cancelled(&mut cancel) => Err(MediaError::Cancelled.into()),
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Reduce a client-provided filename to a safe bare basename.
fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if base.is_empty() || base == "." || base == ".." {
        "input.dat".to_string()
    } else {
        format!("input_{base}")
    }
}
