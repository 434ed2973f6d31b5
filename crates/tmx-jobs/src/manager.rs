//! Bounded job queue and worker pool.
//!
//! Workers loop: dequeue, create the work dir, stage the input, synthesize
//! the ffmpeg plan, supervise each step, probe the artifact, hand it to the
//! session for delivery. One worker processes one job at a time and jobs
//! never migrate, so in-flight subprocesses are capped by the worker count.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, error, info, warn};

use tmx_media::synth::{PlanStep, SynthProbe};
use tmx_media::{loudnorm, probe, synthesize, FfmpegRunner, MediaError};
use tmx_models::operation::OperationRequest;
use tmx_models::ErrorCode;

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobEvent, JobStatus};
use crate::stage::{stage, StageLimits};
use crate::workdir::{sweep, WorkDirGuard};

/// Job manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Worker count; also the cap on concurrent ffmpeg pipelines.
    pub workers: usize,
    /// Queue capacity; submissions beyond it are rejected.
    pub queue_cap: usize,
    /// Root directory for per-job work dirs.
    pub work_root: PathBuf,
    /// Input size cap in bytes (download and upload alike).
    pub max_input_bytes: u64,
    /// Wall-clock timeout per ffmpeg invocation.
    pub ffmpeg_timeout: Duration,
    /// Thread hint passed to ffmpeg (0 = auto).
    pub ffmpeg_threads: u32,
    /// How long to wait for an upload after the job starts running.
    pub upload_timeout: Duration,
    /// Interval of the stale work dir sweeper.
    pub cleanup_interval: Duration,
    /// Age past which a work dir is considered orphaned.
    pub work_dir_max_age: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_cap: 64,
            work_root: PathBuf::from("/tmp/tmx-jobs"),
            max_input_bytes: 500 * 1024 * 1024,
            ffmpeg_timeout: Duration::from_secs(600),
            ffmpeg_threads: 0,
            upload_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
            work_dir_max_age: Duration::from_secs(3600),
        }
    }
}

/// Queue statistics for the health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    pub total: u64,
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

/// Why a submission was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    QueueFull,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The signal fired (or had already fired); the worker will land the
    /// job in `cancelled`.
    Signalled,
    /// The job already reached a terminal state.
    AlreadyTerminal,
}

struct QueueEntry {
    job: Arc<Job>,
    events: mpsc::Sender<JobEvent>,
}

/// Owns the queue, the worker pool and the background sweeper.
pub struct JobManager {
    config: ManagerConfig,
    queue_tx: mpsc::Sender<QueueEntry>,
    queued: AtomicUsize,
    active: AtomicUsize,
    total: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl JobManager {
    /// Start the worker pool and sweeper.
    pub fn start(config: ManagerConfig) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel::<QueueEntry>(config.queue_cap.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        let manager = Arc::new(Self {
            config,
            queue_tx,
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            total: AtomicU64::new(0),
            shutdown_tx,
        });

        info!(
            workers = manager.config.workers,
            queue_cap = manager.config.queue_cap,
            "starting job manager"
        );

        let queue_rx = Arc::new(Mutex::new(queue_rx));
        for worker_id in 0..manager.config.workers.max(1) {
            let manager = Arc::clone(&manager);
            let queue_rx = Arc::clone(&queue_rx);
            tokio::spawn(async move {
                manager.worker_loop(worker_id, queue_rx).await;
            });
        }

        let sweeper = Arc::clone(&manager);
        tokio::spawn(async move {
            sweeper.sweep_loop().await;
        });

        manager
    }

    /// Enqueue a job; returns immediately.
    pub fn submit(
        &self,
        job: Arc<Job>,
        events: mpsc::Sender<JobEvent>,
    ) -> Result<(), SubmitError> {
        let entry = QueueEntry {
            job: Arc::clone(&job),
            events,
        };
        match self.queue_tx.try_send(entry) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::SeqCst);
                self.total.fetch_add(1, Ordering::SeqCst);
                info!(job_id = %job.id, operation = %job.request.operation(), "job queued");
                Ok(())
            }
            Err(_) => {
                warn!(job_id = %job.id, "queue full, rejecting job");
                Err(SubmitError::QueueFull)
            }
        }
    }

    /// Fire a job's cancel signal.
    pub fn cancel(&self, job: &Job) -> CancelOutcome {
        if job.is_terminal() {
            return CancelOutcome::AlreadyTerminal;
        }
        info!(job_id = %job.id, "cancelling job");
        job.request_cancel();
        CancelOutcome::Signalled
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            total: self.total.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
            max_concurrent: self.config.workers,
        }
    }

    /// Stop workers and the sweeper. In-flight jobs finish on their own.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    async fn worker_loop(&self, worker_id: usize, queue_rx: Arc<Mutex<mpsc::Receiver<QueueEntry>>>) {
        debug!(worker_id, "worker started");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let entry = tokio::select! {
                entry = async { queue_rx.lock().await.recv().await } => entry,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let Some(entry) = entry else { break };
            self.queued.fetch_sub(1, Ordering::SeqCst);
            self.active.fetch_add(1, Ordering::SeqCst);

            debug!(worker_id, job_id = %entry.job.id, "worker picked up job");
            self.process(entry).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
        }

        debug!(worker_id, "worker stopped");
    }

    /// Drive one job to a terminal state, emitting exactly one terminal
    /// event toward the session.
    async fn process(&self, entry: QueueEntry) {
        let QueueEntry { job, events } = entry;

        // A cancel that raced the queue wins before any work happens.
        if job.cancel_requested() {
            self.finish_cancelled(&job, &events).await;
            return;
        }

        let result = self.run_job(&job, &events).await;

        match result {
            Ok(()) => {
                job.finish(JobStatus::Completed, None);
                info!(job_id = %job.id, "job completed");
            }
            Err(e) if e.is_cancelled() => {
                self.finish_cancelled(&job, &events).await;
            }
            Err(e) => {
                let code = e.code();
                let message = e.to_string();
                error!(job_id = %job.id, code = %code, "job failed: {message}");
                job.finish(JobStatus::Failed, Some((code, message.clone())));
                let details = match &e {
                    JobError::Media(MediaError::FfmpegFailed { stderr_tail, .. }) => {
                        Some(stderr_tail.clone())
                    }
                    _ => None,
                };
                let _ = events
                    .send(JobEvent::Failed {
                        job_id: job.id.clone(),
                        code,
                        message,
                        details,
                    })
                    .await;
            }
        }
    }

    async fn finish_cancelled(&self, job: &Job, events: &mpsc::Sender<JobEvent>) {
        info!(job_id = %job.id, "job cancelled");
        job.finish(
            JobStatus::Cancelled,
            Some((ErrorCode::JobCancelled, "Job cancelled".into())),
        );
        let _ = events
            .send(JobEvent::Failed {
                job_id: job.id.clone(),
                code: ErrorCode::JobCancelled,
                message: "Job cancelled".into(),
                details: None,
            })
            .await;
    }

    /// The happy path: stage, synthesize, supervise, probe, deliver.
    /// The work dir guard created here is released on every exit path.
    async fn run_job(&self, job: &Arc<Job>, events: &mpsc::Sender<JobEvent>) -> JobResult<()> {
        let cancel = job.cancel_signal();

        job.advance(JobStatus::Downloading);
        send_progress(events, job, 0.0, "downloading").await;

        let guard = WorkDirGuard::create(&self.config.work_root).await?;

        // Stage input (0-5% band).
        let limits = StageLimits {
            max_bytes: self.config.max_input_bytes,
            upload_timeout: self.config.upload_timeout,
        };
        let input_path = {
            let events = events.clone();
            let job_for_progress = Arc::clone(job);
            stage(job, guard.path(), limits, &cancel, move |pct| {
                job_for_progress.set_progress(pct);
                let _ = events.try_send(JobEvent::Progress {
                    job_id: job_for_progress.id.clone(),
                    percent: pct,
                    stage: "downloading",
                });
            })
            .await?
        };

        if job.cancel_requested() {
            return Err(MediaError::Cancelled.into());
        }

        // One probe pass informs synthesis and input validation.
        let input_meta = probe(&input_path).await;
        let synth_probe = SynthProbe {
            duration: input_meta.duration,
            has_audio: input_meta.has_audio(),
        };

        if matches!(job.request, OperationRequest::ExtractAudio(_)) && !synth_probe.has_audio {
            return Err(JobError::NoAudioStream);
        }

        job.advance(JobStatus::Processing);
        job.set_progress(10.0);
        send_progress(events, job, 10.0, "preparing").await;

        let plan = synthesize(
            &job.request,
            &input_path,
            guard.path(),
            &synth_probe,
            self.config.ffmpeg_threads,
        );

        // Supervise each step, splitting the 10-90% band across them.
        let runner = FfmpegRunner::new(self.config.ffmpeg_timeout);
        let step_count = plan.steps.len().max(1);
        let mut measured: Option<loudnorm::LoudnormStats> = None;

        for (index, step) in plan.steps.iter().enumerate() {
            let band_start = 10.0 + 80.0 * index as f64 / step_count as f64;
            let band_width = 80.0 / step_count as f64;

            let argv = match (step, &measured) {
                (PlanStep::Transcode { argv }, Some(stats)) => loudnorm::resolve(argv, stats),
                (PlanStep::Transcode { argv }, None) => argv.clone(),
                (PlanStep::MeasureLoudness { argv }, _) => argv.clone(),
            };

            let report = {
                let events = events.clone();
                let job_for_progress = Arc::clone(job);
                runner
                    .run(&argv, input_meta.duration, &cancel, move |pct| {
                        let overall = band_start + pct * band_width / 100.0;
                        job_for_progress.set_progress(overall);
                        let _ = events.try_send(JobEvent::Progress {
                            job_id: job_for_progress.id.clone(),
                            percent: overall,
                            stage: "processing",
                        });
                    })
                    .await?
            };

            if matches!(step, PlanStep::MeasureLoudness { .. }) {
                measured = Some(loudnorm::parse_stats(&report.stderr_tail)?);
            }
        }

        if job.cancel_requested() {
            return Err(MediaError::Cancelled.into());
        }

        // Probe the artifact (never fatal) and hand it over for delivery.
        job.advance(JobStatus::Uploading);
        job.set_progress(95.0);
        send_progress(events, job, 95.0, "finalizing").await;

        let artifact = plan.output.primary();
        let metadata = probe(&artifact).await;
        let filename = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("output.bin")
            .to_string();

        job.set_progress(100.0);
        send_progress(events, job, 100.0, "completed").await;

        let (delivered_tx, delivered_rx) = oneshot::channel();
        events
            .send(JobEvent::Completed {
                job_id: job.id.clone(),
                metadata,
                artifact,
                filename,
                delivered: delivered_tx,
            })
            .await
            .map_err(|_| JobError::Delivery("session is gone".into()))?;

        // Keep the work dir alive until the session confirms the send.
        match delivered_rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(JobError::Delivery("channel write failed".into())),
            Err(_) => Err(JobError::Delivery("session dropped the artifact".into())),
        }
    }

    async fn sweep_loop(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut interval = tokio::time::interval(self.config.cleanup_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = sweep(&self.config.work_root, self.config.work_dir_max_age).await;
                    if removed > 0 {
                        info!(removed, "swept stale work dirs");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

async fn send_progress(
    events: &mpsc::Sender<JobEvent>,
    job: &Job,
    percent: f64,
    stage: &'static str,
) {
    let _ = events
        .send(JobEvent::Progress {
            job_id: job.id.clone(),
            percent,
            stage,
        })
        .await;
}
