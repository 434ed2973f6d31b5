//! Per-connection session handling.
//!
//! Every connection gets one dispatch loop, one event pump and one writer
//! task. All outbound traffic funnels through the writer's channel, so a
//! completion (JSON envelope followed by the artifact frame) is a single
//! queue item that can never interleave with another job's events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use tmx_jobs::{Job, JobEvent, SubmitError, UploadPayload};
use tmx_models::{
    decode_frame, encode_frame, decode_client_message, ClientMessage, ErrorCode, FrameHeader,
    ServerMessage, StartJobMessage,
};

use crate::state::AppState;

/// Writer queue depth before senders start applying backpressure.
const OUT_BUFFER: usize = 32;
/// Job event queue depth per session.
const EVENT_BUFFER: usize = 256;

/// Everything the writer task can emit.
enum Outbound {
    Message(ServerMessage),
    /// Completion envelope plus artifact frame, sent back to back. The
    /// outcome is reported on `delivered`.
    Artifact {
        message: ServerMessage,
        frame: Vec<u8>,
        delivered: oneshot::Sender<bool>,
    },
    Ping,
}

/// The set of jobs submitted on one connection.
type JobMap = Arc<Mutex<HashMap<String, Arc<Job>>>>;

/// Run a session until the connection closes.
pub async fn run(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();

    let (out_tx, out_rx) = mpsc::channel::<Outbound>(OUT_BUFFER);
    let (events_tx, events_rx) = mpsc::channel::<JobEvent>(EVENT_BUFFER);

    let jobs: JobMap = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(write_loop(sink, out_rx));
    tokio::spawn(event_pump(
        events_rx,
        out_tx.clone(),
        Arc::clone(&jobs),
        state.config.retention,
    ));

    dispatch_loop(stream, &state, &jobs, &out_tx, &events_tx).await;

    // Disconnect: cancel whatever is still running, best effort, no waiting.
    let remaining: Vec<Arc<Job>> = jobs
        .lock()
        .expect("session job map")
        .values()
        .cloned()
        .collect();
    let mut cancelled = 0;
    for job in remaining {
        if !job.is_terminal() {
            state.manager.cancel(&job);
            cancelled += 1;
        }
    }
    if cancelled > 0 {
        info!(cancelled, "cancelled jobs on disconnect");
    }

    // The writer and pump wind down on their own once the last event
    // sender drops; cancelled jobs are not waited for.
    drop(out_tx);
    drop(events_tx);
    debug!("session ended");
}

/// Single outbound writer; the only task that touches the sink.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Message(msg) => {
                if send_json(&mut sink, &msg).await.is_err() {
                    break;
                }
            }
            Outbound::Artifact {
                message,
                frame,
                delivered,
            } => {
                let ok = send_json(&mut sink, &message).await.is_ok()
                    && sink.send(Message::Binary(frame)).await.is_ok();
                let _ = delivered.send(ok);
                if !ok {
                    break;
                }
            }
            Outbound::Ping => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_json(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sink.send(Message::Text(json)).await,
        Err(e) => {
            warn!("failed to serialize outbound message: {e}");
            Ok(())
        }
    }
}

/// Translate worker events into outbound frames.
async fn event_pump(
    mut events: mpsc::Receiver<JobEvent>,
    out_tx: mpsc::Sender<Outbound>,
    jobs: JobMap,
    retention: Duration,
) {
    while let Some(event) = events.recv().await {
        match event {
            JobEvent::Progress {
                job_id,
                percent,
                stage,
            } => {
                let msg = ServerMessage::progress(job_id, percent, stage);
                if out_tx.send(Outbound::Message(msg)).await.is_err() {
                    break;
                }
            }
            JobEvent::Completed {
                job_id,
                metadata,
                artifact,
                filename,
                delivered,
            } => {
                let frame = match tokio::fs::read(&artifact).await {
                    Ok(bytes) => {
                        let header = FrameHeader::new(&job_id, &filename)
                            .with_metadata(metadata.clone());
                        encode_frame(&header, &bytes)
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, "failed to read artifact: {e}");
                        let _ = delivered.send(false);
                        schedule_purge(&jobs, job_id, retention);
                        continue;
                    }
                };
                let message = ServerMessage::completed(job_id.clone(), metadata);
                if out_tx
                    .send(Outbound::Artifact {
                        message,
                        frame,
                        delivered,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                schedule_purge(&jobs, job_id, retention);
            }
            JobEvent::Failed {
                job_id,
                code,
                message,
                details,
            } => {
                let msg = match details {
                    Some(details) => ServerMessage::error_with_details(
                        Some(job_id.clone()),
                        code,
                        message,
                        details,
                    ),
                    None => ServerMessage::error(Some(job_id.clone()), code, message),
                };
                if out_tx.send(Outbound::Message(msg)).await.is_err() {
                    break;
                }
                schedule_purge(&jobs, job_id, retention);
            }
        }
    }
}

/// Drop a terminal job from the session map after the retention grace, so
/// late frames can still be reconciled against it in the meantime.
fn schedule_purge(jobs: &JobMap, job_id: String, retention: Duration) {
    let jobs = Arc::clone(jobs);
    tokio::spawn(async move {
        tokio::time::sleep(retention).await;
        let mut map = jobs.lock().expect("session job map");
        if map.get(&job_id).is_some_and(|j| j.is_terminal()) {
            map.remove(&job_id);
            debug!(job_id = %job_id, "purged terminal job");
        }
    });
}

/// Inbound dispatch: control messages, uploads and heartbeat.
async fn dispatch_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    jobs: &JobMap,
    out_tx: &mpsc::Sender<Outbound>,
    events_tx: &mpsc::Sender<JobEvent>,
) {
    let mut heartbeat = interval(state.config.ws_ping_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let idle_limit = state.config.ws_ping_interval + state.config.ws_ping_timeout;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!("connection error: {e}");
                        break;
                    }
                    None => break,
                };
                last_seen = Instant::now();

                match msg {
                    Message::Text(text) => {
                        handle_text(&text, state, jobs, out_tx, events_tx).await;
                    }
                    Message::Binary(data) => {
                        handle_binary(&data, jobs, out_tx).await;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => {
                        info!("client closed connection");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > idle_limit {
                    warn!("peer silent past the ping timeout, closing");
                    break;
                }
                if out_tx.send(Outbound::Ping).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn handle_text(
    text: &str,
    state: &AppState,
    jobs: &JobMap,
    out_tx: &mpsc::Sender<Outbound>,
    events_tx: &mpsc::Sender<JobEvent>,
) {
    let message = match decode_client_message(text) {
        Ok(message) => message,
        Err(e) => {
            send(out_tx, ServerMessage::error(None, e.code(), e.to_string())).await;
            return;
        }
    };

    match message {
        ClientMessage::StartJob(start) => {
            handle_start_job(start, state, jobs, out_tx, events_tx).await;
        }
        ClientMessage::CancelJob { job_id } => {
            handle_cancel_job(&job_id, state, jobs, out_tx).await;
        }
        ClientMessage::Ping => {
            send(out_tx, ServerMessage::pong()).await;
        }
    }
}

async fn handle_start_job(
    start: StartJobMessage,
    state: &AppState,
    jobs: &JobMap,
    out_tx: &mpsc::Sender<Outbound>,
    events_tx: &mpsc::Sender<JobEvent>,
) {
    let StartJobMessage {
        job_id,
        request,
        input,
    } = start;

    info!(job_id = %job_id, operation = %request.operation(), "start_job received");

    let job = Arc::new(Job::new(job_id.clone(), request, input));

    // Claim the id; a live duplicate is rejected.
    let duplicate = {
        let mut map = jobs.lock().expect("session job map");
        match map.get(&job_id) {
            Some(existing) if !existing.is_terminal() => true,
            _ => {
                map.insert(job_id.clone(), Arc::clone(&job));
                false
            }
        }
    };
    if duplicate {
        send(
            out_tx,
            ServerMessage::error(
                Some(job_id),
                ErrorCode::SubmitFailed,
                "a job with this id is already running",
            ),
        )
        .await;
        return;
    }

    // Ack goes onto the writer queue before the submission so no worker
    // progress event can overtake it.
    send(out_tx, ServerMessage::ack(job_id.clone())).await;

    if let Err(SubmitError::QueueFull) = state.manager.submit(Arc::clone(&job), events_tx.clone())
    {
        jobs.lock().expect("session job map").remove(&job_id);
        send(
            out_tx,
            ServerMessage::error(
                Some(job_id),
                ErrorCode::SubmitFailed,
                "job queue is full, try again later",
            ),
        )
        .await;
    }
}

async fn handle_cancel_job(
    job_id: &str,
    state: &AppState,
    jobs: &JobMap,
    out_tx: &mpsc::Sender<Outbound>,
) {
    info!(job_id = %job_id, "cancel_job received");

    let job = jobs.lock().expect("session job map").get(job_id).cloned();
    let Some(job) = job else {
        send(
            out_tx,
            ServerMessage::error(
                Some(job_id.to_string()),
                ErrorCode::CancelFailed,
                "job not found",
            ),
        )
        .await;
        return;
    };

    match state.manager.cancel(&job) {
        tmx_jobs::CancelOutcome::Signalled => {
            send(
                out_tx,
                ServerMessage::Ack {
                    job_id: job_id.to_string(),
                    message: "Cancellation requested".to_string(),
                },
            )
            .await;
        }
        tmx_jobs::CancelOutcome::AlreadyTerminal => {
            send(
                out_tx,
                ServerMessage::error(
                    Some(job_id.to_string()),
                    ErrorCode::CancelFailed,
                    "job already finished",
                ),
            )
            .await;
        }
    }
}

async fn handle_binary(data: &[u8], jobs: &JobMap, out_tx: &mpsc::Sender<Outbound>) {
    let (header, payload) = match decode_frame(data) {
        Ok(decoded) => decoded,
        Err(e) => {
            send(
                out_tx,
                ServerMessage::error(None, ErrorCode::InvalidBinary, e.to_string()),
            )
            .await;
            return;
        }
    };

    let job = jobs
        .lock()
        .expect("session job map")
        .get(&header.job_id)
        .cloned();
    let Some(job) = job else {
        send(
            out_tx,
            ServerMessage::error(
                Some(header.job_id),
                ErrorCode::BinaryError,
                "no job matches this upload",
            ),
        )
        .await;
        return;
    };

    debug!(job_id = %header.job_id, bytes = payload.len(), "binary upload received");

    let upload = UploadPayload {
        filename: header.filename,
        bytes: payload.to_vec(),
    };
    if let Err(rejection) = job.deliver_upload(upload) {
        send(
            out_tx,
            ServerMessage::error(
                Some(header.job_id),
                ErrorCode::BinaryError,
                rejection.message(),
            ),
        )
        .await;
    }
}

async fn send(out_tx: &mpsc::Sender<Outbound>, msg: ServerMessage) {
    let _ = out_tx.send(Outbound::Message(msg)).await;
}
