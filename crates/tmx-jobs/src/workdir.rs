//! Work directory ownership and sweeping.
//!
//! Every job owns exactly one fresh directory under the configured root.
//! The guard removes it on drop, which covers success, failure,
//! cancellation and panics alike. A background sweep removes directories
//! that outlive a maximum age in case a guard never ran (e.g. the process
//! was killed).

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

/// Scoped owner of a job's work directory.
#[derive(Debug)]
pub struct WorkDirGuard {
    path: PathBuf,
}

impl WorkDirGuard {
    /// Create a fresh, exclusively owned directory under `root`.
    ///
    /// The directory name is a server-generated UUID; client-chosen job ids
    /// never reach the filesystem.
    pub async fn create(root: &Path) -> std::io::Result<Self> {
        let path = root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "created work dir");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        // Synchronous removal keeps the guarantee on panic unwinds.
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "failed to remove work dir: {e}");
            }
        } else {
            debug!(path = %self.path.display(), "removed work dir");
        }
    }
}

/// Remove directories under `root` older than `max_age`.
///
/// Returns the number of directories removed. Errors on individual entries
/// are logged and skipped.
pub async fn sweep(root: &Path, max_age: Duration) -> usize {
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let age = entry
            .metadata()
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.elapsed().ok());
        if let Some(age) = age {
            if age > max_age {
                match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => {
                        debug!(path = %path.display(), "swept stale work dir");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), "sweep failed: {e}"),
                }
            }
        }
    }
    removed
}
