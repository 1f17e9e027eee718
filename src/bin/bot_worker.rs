//! bot_worker runs one translation-avatar session in isolation. A crash
//! in the conference SDK takes down this process, not the control plane.
//!
//! stdout is reserved for IPC frames to the parent; the real stdout fd is
//! duplicated away and fd 1 is pointed at /dev/null before anything else
//! runs, so no library can pollute the protocol stream. Logs go to stderr.

use std::os::unix::io::{AsRawFd, FromRawFd};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use avatar_bridge::anam::{AnamClient, AnamConfig};
use avatar_bridge::config;
use avatar_bridge::ipc::{
    CodecError, FrameReader, FrameWriter, IpcMessage, SessionStatus, StartSessionPayload,
};
use avatar_bridge::rtc;
use avatar_bridge::sync::Latch;
use avatar_bridge::worker::{codes, BotWorker, EventSink, WorkerConfig};

/// How long a stopped session may spend in teardown before the process
/// exits anyway. The parent kills us after 5 s regardless.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(4);

fn steal_stdout() -> Result<std::fs::File> {
    let devnull = std::fs::OpenOptions::new()
        .write(true)
        .open("/dev/null")
        .context("failed to open /dev/null")?;
    let ipc_fd = unsafe { libc::dup(libc::STDOUT_FILENO) };
    ensure!(ipc_fd >= 0, "dup(stdout) failed");
    let rc = unsafe { libc::dup2(devnull.as_raw_fd(), libc::STDOUT_FILENO) };
    ensure!(rc >= 0, "dup2(/dev/null, stdout) failed");
    Ok(unsafe { std::fs::File::from_raw_fd(ipc_fd) })
}

fn anam_config(payload: &StartSessionPayload) -> AnamConfig {
    AnamConfig {
        base_url: payload.anam_base_url.clone(),
        api_key: payload.anam_api_key.clone(),
        avatar_id: payload.anam_avatar_id.clone(),
        app_id: payload.app_id.clone(),
        channel: payload.channel.clone(),
        uid: payload.anam_uid,
        token: payload.anam_token.clone(),
        quality: config::quality_from_env(),
        video_encoding: config::video_encoding_from_env(),
        insecure_tls: config::insecure_tls_from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let ipc_stdout = steal_stdout()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
    info!("bot worker process started");

    // Single writer task: everything headed for the parent goes through
    // this channel so frames cannot interleave.
    let writer = FrameWriter::new(tokio::fs::File::from_std(ipc_stdout));
    let (ipc_tx, mut ipc_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = ipc_rx.recv().await {
            if let Err(e) = writer.write_frame(&frame).await {
                error!(error = %e, "failed to write IPC frame, stopping writer");
                break;
            }
        }
    });

    let reader = FrameReader::new(tokio::io::stdin());
    command_loop(reader, ipc_tx).await;

    // Let queued envelopes drain before exit. The writer ends once every
    // sender clone is gone.
    let _ = timeout(Duration::from_secs(2), writer_task).await;
    info!("bot worker process exiting");
    Ok(())
}

enum LoopEvent {
    Frame(Result<Vec<u8>, CodecError>),
    WorkerDone,
}

async fn command_loop(
    mut reader: FrameReader<tokio::io::Stdin>,
    ipc_tx: mpsc::UnboundedSender<Vec<u8>>,
) {
    let mut stop: Option<Arc<Latch>> = None;
    let mut run_task: Option<JoinHandle<()>> = None;

    loop {
        let event = if let Some(task) = run_task.as_mut() {
            tokio::select! {
                _ = task => LoopEvent::WorkerDone,
                frame = reader.read_frame() => LoopEvent::Frame(frame),
            }
        } else {
            LoopEvent::Frame(reader.read_frame().await)
        };

        let frame = match event {
            LoopEvent::WorkerDone => {
                // The session ended on its own (idle, target left, fatal).
                info!("worker finished, exiting");
                return;
            }
            LoopEvent::Frame(Ok(frame)) => frame,
            LoopEvent::Frame(Err(e)) if e.is_clean_close() => {
                info!("parent closed stdin, shutting down");
                shutdown_session(stop.take(), run_task.take()).await;
                return;
            }
            LoopEvent::Frame(Err(e)) => {
                error!(error = %e, "error reading from stdin");
                shutdown_session(stop.take(), run_task.take()).await;
                return;
            }
        };

        match avatar_bridge::ipc::decode(&frame) {
            Err(e) => {
                warn!(error = %e, "error parsing IPC message");
                continue;
            }
            Ok(None) => {
                warn!("unknown IPC message type, ignoring");
                continue;
            }
            Ok(Some(IpcMessage::StartSession(payload))) => {
                if run_task.is_some() {
                    warn!("session already running, ignoring START_SESSION");
                    continue;
                }
                info!(task_id = %payload.task_id, "received START_SESSION");

                let events = EventSink::new(payload.task_id.clone(), ipc_tx.clone());
                events.status(SessionStatus::Initializing, "Starting session", 0);

                let service = match rtc::service_from_env(&payload.app_id) {
                    Ok(service) => service,
                    Err(e) => {
                        let msg = format!("failed to initialize conference backend: {e:#}");
                        error!("{msg}");
                        events.error(codes::WORKER_FAILED, &msg, true);
                        return;
                    }
                };

                let avatar = AnamClient::new(anam_config(&payload));
                let worker = BotWorker::new(
                    WorkerConfig::from_payload(&payload),
                    avatar,
                    service,
                    events.clone(),
                );

                let session_stop = Arc::new(Latch::new());
                let task = tokio::spawn({
                    let session_stop = session_stop.clone();
                    async move {
                        if let Err(e) = worker.run(session_stop).await {
                            error!(error = %e, "worker failed");
                            events.error(codes::WORKER_FAILED, &format!("{e:#}"), true);
                        }
                    }
                });
                stop = Some(session_stop);
                run_task = Some(task);
            }
            Ok(Some(IpcMessage::StopSession(payload))) => {
                info!(task_id = %payload.task_id, reason = %payload.reason, "received STOP_SESSION");
                shutdown_session(stop.take(), run_task.take()).await;
                return;
            }
            Ok(Some(other)) => {
                warn!(message_type = ?other.message_type(), "unexpected IPC message, ignoring");
            }
        }
    }
}

async fn shutdown_session(stop: Option<Arc<Latch>>, run_task: Option<JoinHandle<()>>) {
    if let Some(stop) = stop {
        stop.fire();
    }
    if let Some(mut task) = run_task {
        if timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
            warn!("session did not stop in time, aborting");
            task.abort();
        }
    }
}
