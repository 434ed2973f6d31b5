//! Job record and state machine.
//!
//! A [`Job`] is shared between its owning session (cancel, upload delivery)
//! and the worker processing it. Status moves strictly forward through
//! `queued → downloading → processing → uploading → completed`, with
//! `failed`/`cancelled` reachable from any non-terminal state.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};

use tmx_models::operation::{InputSource, OperationRequest};
use tmx_models::{ErrorCode, MediaMetadata};

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobStatus {
    #[default]
    Queued,
    Downloading,
    Processing,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Processing => "processing",
            JobStatus::Uploading => "uploading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Position in the forward progression; terminal states share a rank.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Downloading => 1,
            JobStatus::Processing => 2,
            JobStatus::Uploading => 3,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 4,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A binary upload delivered by the session for an upload-input job.
#[derive(Debug)]
pub struct UploadPayload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Why an inbound upload frame could not be routed to this job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRejection {
    /// The job does not take an upload input.
    NotExpectingUpload,
    /// The slot was already filled (or the worker gave up waiting).
    AlreadyDelivered,
    /// The job has advanced past the point where an upload makes sense.
    WrongState,
}

impl UploadRejection {
    pub fn message(&self) -> &'static str {
        match self {
            UploadRejection::NotExpectingUpload => "job does not expect an upload",
            UploadRejection::AlreadyDelivered => "upload already received for this job",
            UploadRejection::WrongState => "job is no longer accepting an upload",
        }
    }
}

/// Events a job emits toward its owning session.
#[derive(Debug)]
pub enum JobEvent {
    Progress {
        job_id: String,
        percent: f64,
        stage: &'static str,
    },
    /// Terminal success. The session sends the `completed` envelope followed
    /// by the artifact frame, then reports the outcome on `delivered`; the
    /// worker keeps the work dir alive until then.
    Completed {
        job_id: String,
        metadata: MediaMetadata,
        artifact: PathBuf,
        filename: String,
        delivered: oneshot::Sender<bool>,
    },
    /// Terminal failure (including cancellation).
    Failed {
        job_id: String,
        code: ErrorCode,
        message: String,
        details: Option<String>,
    },
}

/// Mutable per-job state, guarded by the job's mutex.
#[derive(Debug, Default)]
struct JobState {
    status: JobStatus,
    progress: f64,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<(ErrorCode, String)>,
}

/// One unit of work: an operation applied to one input producing one artifact.
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub request: OperationRequest,
    pub input: InputSource,
    pub created_at: DateTime<Utc>,

    state: Mutex<JobState>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    upload_slot: Mutex<Option<oneshot::Sender<UploadPayload>>>,
    upload_rx: Mutex<Option<oneshot::Receiver<UploadPayload>>>,
}

impl Job {
    /// Create a job; upload-input jobs get a fresh single-slot rendezvous.
    pub fn new(id: impl Into<String>, request: OperationRequest, input: InputSource) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (upload_slot, upload_rx) = match &input {
            InputSource::Upload { .. } => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
            InputSource::Url { .. } => (None, None),
        };

        Self {
            id: id.into(),
            request,
            input,
            created_at: Utc::now(),
            state: Mutex::new(JobState::default()),
            cancel_tx,
            cancel_rx,
            upload_slot: Mutex::new(upload_slot),
            upload_rx: Mutex::new(upload_rx),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().expect("job state lock").status
    }

    pub fn progress(&self) -> f64 {
        self.state.lock().expect("job state lock").progress
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("job state lock").started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("job state lock").finished_at
    }

    pub fn error(&self) -> Option<(ErrorCode, String)> {
        self.state.lock().expect("job state lock").error.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// A receiver for this job's one-shot cancel signal.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    /// Whether the cancel signal has fired.
    pub fn cancel_requested(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Fire the cancel signal. Idempotent; observed by the worker at its
    /// next suspension point.
    pub fn request_cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Advance to a later non-terminal status. Backward or repeated
    /// transitions and transitions out of a terminal state are ignored.
    pub fn advance(&self, status: JobStatus) -> bool {
        debug_assert!(!status.is_terminal(), "use finish() for terminal states");
        let mut state = self.state.lock().expect("job state lock");
        if state.status.is_terminal() || status.rank() <= state.status.rank() {
            return false;
        }
        if state.started_at.is_none() {
            state.started_at = Some(Utc::now());
        }
        state.status = status;
        true
    }

    /// Record progress; never regresses within the current status.
    pub fn set_progress(&self, percent: f64) {
        let mut state = self.state.lock().expect("job state lock");
        if !state.status.is_terminal() {
            state.progress = state.progress.max(percent.clamp(0.0, 100.0));
        }
    }

    /// Move to a terminal state exactly once. Returns false if the job
    /// already finished.
    pub fn finish(&self, status: JobStatus, error: Option<(ErrorCode, String)>) -> bool {
        debug_assert!(status.is_terminal());
        let mut state = self.state.lock().expect("job state lock");
        if state.status.is_terminal() {
            return false;
        }
        if state.started_at.is_none() {
            state.started_at = Some(Utc::now());
        }
        state.status = status;
        state.finished_at = Some(Utc::now());
        state.error = error;
        if status == JobStatus::Completed {
            state.progress = 100.0;
        }
        true
    }

    /// Deliver an upload payload into the job's rendezvous slot.
    pub fn deliver_upload(&self, payload: UploadPayload) -> Result<(), UploadRejection> {
        let mut slot = self.upload_slot.lock().expect("upload slot lock");
        match &self.input {
            InputSource::Upload { .. } => {}
            InputSource::Url { .. } => return Err(UploadRejection::NotExpectingUpload),
        }
        if !matches!(self.status(), JobStatus::Queued | JobStatus::Downloading) {
            return Err(UploadRejection::WrongState);
        }
        let sender = slot.take().ok_or(UploadRejection::AlreadyDelivered)?;
        sender
            .send(payload)
            .map_err(|_| UploadRejection::AlreadyDelivered)
    }

    /// Take the worker-side half of the upload rendezvous.
    pub(crate) fn take_upload_rx(&self) -> Option<oneshot::Receiver<UploadPayload>> {
        self.upload_rx.lock().expect("upload rx lock").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmx_models::operation::TrimOptions;

    fn trim_job(input: InputSource) -> Job {
        Job::new(
            "j1",
            OperationRequest::Trim(TrimOptions {
                start_time: 0.0,
                end_time: 1.0,
            }),
            input,
        )
    }

    #[test]
    fn status_progression_is_monotone() {
        let job = trim_job(InputSource::Upload { filename: None });
        assert_eq!(job.status(), JobStatus::Queued);
        assert!(job.started_at().is_none());

        assert!(job.advance(JobStatus::Downloading));
        assert!(job.started_at().is_some());
        assert!(job.advance(JobStatus::Processing));

        // No going back.
        assert!(!job.advance(JobStatus::Downloading));
        assert_eq!(job.status(), JobStatus::Processing);

        assert!(job.finish(JobStatus::Completed, None));
        assert!(job.finished_at().is_some());
        assert_eq!(job.progress(), 100.0);

        // Terminal is sticky.
        assert!(!job.advance(JobStatus::Uploading));
        assert!(!job.finish(JobStatus::Failed, None));
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[test]
    fn progress_never_regresses() {
        let job = trim_job(InputSource::Upload { filename: None });
        job.advance(JobStatus::Processing);
        job.set_progress(40.0);
        job.set_progress(20.0);
        assert_eq!(job.progress(), 40.0);
        job.set_progress(250.0);
        assert_eq!(job.progress(), 100.0);
    }

    #[test]
    fn cancel_signal_is_idempotent() {
        let job = trim_job(InputSource::Upload { filename: None });
        let rx = job.cancel_signal();
        assert!(!*rx.borrow());

        job.request_cancel();
        job.request_cancel();
        assert!(job.cancel_requested());

        // One state change when the worker observes it.
        assert!(job.finish(
            JobStatus::Cancelled,
            Some((ErrorCode::JobCancelled, "cancelled".into()))
        ));
        assert!(!job.finish(JobStatus::Cancelled, None));
    }

    #[test]
    fn upload_rendezvous_single_slot() {
        let job = trim_job(InputSource::Upload { filename: None });
        let rx = job.take_upload_rx().unwrap();

        job.deliver_upload(UploadPayload {
            filename: "in.mp4".into(),
            bytes: vec![1, 2, 3],
        })
        .unwrap();

        // Second delivery is rejected.
        let err = job
            .deliver_upload(UploadPayload {
                filename: "again.mp4".into(),
                bytes: vec![],
            })
            .unwrap_err();
        assert_eq!(err, UploadRejection::AlreadyDelivered);

        let payload = rx.blocking_recv().unwrap();
        assert_eq!(payload.filename, "in.mp4");
        assert_eq!(payload.bytes, vec![1, 2, 3]);
    }

    #[test]
    fn upload_rejected_for_url_jobs() {
        let job = trim_job(InputSource::Url {
            url: "http://test/v.mp4".into(),
        });
        let err = job
            .deliver_upload(UploadPayload {
                filename: "in.mp4".into(),
                bytes: vec![],
            })
            .unwrap_err();
        assert_eq!(err, UploadRejection::NotExpectingUpload);
    }

    #[test]
    fn upload_rejected_after_processing_starts() {
        let job = trim_job(InputSource::Upload { filename: None });
        job.advance(JobStatus::Downloading);
        job.advance(JobStatus::Processing);
        let err = job
            .deliver_upload(UploadPayload {
                filename: "in.mp4".into(),
                bytes: vec![],
            })
            .unwrap_err();
        assert_eq!(err, UploadRejection::WrongState);
    }
}
