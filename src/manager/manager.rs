use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::handle::SessionHandle;
use crate::ipc::{
    encode, CodecError, FrameReader, FrameWriter, IpcMessage, LogLevel, SessionStatus,
    StartSessionPayload, StopSessionPayload,
};

/// How long a child gets between `StopSession` and a kill signal.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// How long StartSession waits for the child to reach CONNECTED.
const CONNECT_WAIT: Duration = Duration::from_secs(30);

const CONNECT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no session found for task {0}")]
    NotFound(String),
    #[error("session already exists for task {0}")]
    AlreadyExists(String),
    #[error("session failed to connect")]
    ConnectFailed,
    #[error("timeout waiting for session to connect")]
    ConnectTimeout,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Everything a child needs to run one session; serialized into the
/// `StartSession` payload.
#[derive(Debug, Clone)]
pub struct SessionLaunch {
    pub task_id: String,
    pub app_id: String,
    pub channel: String,
    pub bot_uid: u32,
    pub bot_token: String,
    pub palabra_uid: u32,
    pub anam_api_key: String,
    pub anam_base_url: String,
    pub anam_avatar_id: String,
    pub anam_uid: u32,
    pub anam_token: String,
    pub target_language: String,
}

impl SessionLaunch {
    fn to_payload(&self) -> StartSessionPayload {
        StartSessionPayload {
            task_id: self.task_id.clone(),
            app_id: self.app_id.clone(),
            channel: self.channel.clone(),
            bot_uid: self.bot_uid,
            bot_token: self.bot_token.clone(),
            palabra_uid: self.palabra_uid,
            anam_api_key: self.anam_api_key.clone(),
            anam_base_url: self.anam_base_url.clone(),
            anam_avatar_id: self.anam_avatar_id.clone(),
            anam_uid: self.anam_uid,
            anam_token: self.anam_token.clone(),
            target_language: self.target_language.clone(),
        }
    }
}

struct ManagerInner {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    worker_path: PathBuf,
    session_timeout: Duration,
    sdk_lib_path: String,
}

/// Supervises one child process per live session. Clonable; all clones
/// share the same session map.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(worker_path: PathBuf, session_timeout: Duration, sdk_lib_path: String) -> Self {
        info!(
            worker = %worker_path.display(),
            timeout = ?session_timeout,
            "session manager initialized"
        );
        Self {
            inner: Arc::new(ManagerInner {
                sessions: RwLock::new(HashMap::new()),
                worker_path,
                session_timeout,
                sdk_lib_path,
            }),
        }
    }

    /// Spawns a child for the session and waits for it to connect.
    pub async fn start_session(
        &self,
        launch: SessionLaunch,
    ) -> Result<Arc<SessionHandle>, ManagerError> {
        let task_id = launch.task_id.clone();

        let handle = {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.contains_key(&task_id) {
                return Err(ManagerError::AlreadyExists(task_id));
            }

            info!(task_id = %task_id, "starting session");

            // The child inherits our environment plus the SDK library path.
            let lib_path = match std::env::var("LD_LIBRARY_PATH") {
                Ok(existing) => format!("{existing}:{}", self.inner.sdk_lib_path),
                Err(_) => self.inner.sdk_lib_path.clone(),
            };
            let mut child = Command::new(&self.inner.worker_path)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .env("LD_LIBRARY_PATH", lib_path)
                .spawn()
                .context("failed to start child process")?;

            info!(task_id = %task_id, pid = ?child.id(), "child process started");

            let stdin = child.stdin.take().context("child stdin missing")?;
            let stdout = child.stdout.take().context("child stdout missing")?;
            let stderr = child.stderr.take().context("child stderr missing")?;

            let (exit_tx, exit_rx) = watch::channel(false);
            let (kill_tx, kill_rx) = mpsc::channel(1);
            let handle = Arc::new(SessionHandle::new(
                task_id.clone(),
                FrameWriter::new(stdin),
                exit_rx,
                kill_tx,
            ));
            sessions.insert(task_id.clone(), handle.clone());

            tokio::spawn(log_child_stderr(task_id.clone(), stderr));
            tokio::spawn(read_child_messages(handle.clone(), stdout));
            tokio::spawn(wait_child_exit(
                self.clone(),
                handle.clone(),
                child,
                kill_rx,
                exit_tx,
            ));

            handle
        };

        // Hard-duration cap: stop the session from the outside.
        let timer = tokio::spawn({
            let manager = self.clone();
            let task_id = task_id.clone();
            let cap = self.inner.session_timeout;
            async move {
                tokio::time::sleep(cap).await;
                warn!(task_id = %task_id, ?cap, "session hit hard duration cap, stopping");
                if let Err(e) = manager.stop_session(&task_id).await {
                    debug!(task_id = %task_id, error = %e, "timeout stop");
                }
            }
        });
        handle.set_timer(timer);

        let start_msg = encode(&IpcMessage::StartSession(launch.to_payload()))
            .context("failed to encode START_SESSION")?;
        if let Err(e) = handle.write_frame(&start_msg).await {
            error!(task_id = %task_id, error = %e, "failed to send START_SESSION");
            let _ = self.stop_session(&task_id).await;
            return Err(ManagerError::Other(
                anyhow::Error::new(e).context("failed to send start command"),
            ));
        }

        // Poll until the child reports a connection outcome.
        let deadline = tokio::time::Instant::now() + CONNECT_WAIT;
        loop {
            if tokio::time::Instant::now() >= deadline {
                warn!(task_id = %task_id, "timeout waiting for session to connect");
                let _ = self.stop_session(&task_id).await;
                return Err(ManagerError::ConnectTimeout);
            }
            tokio::time::sleep(CONNECT_POLL).await;

            match handle.status().await {
                SessionStatus::Connected | SessionStatus::Streaming => {
                    info!(task_id = %task_id, "session connected");
                    return Ok(handle);
                }
                SessionStatus::Failed => {
                    warn!(task_id = %task_id, "session failed to connect");
                    let _ = self.stop_session(&task_id).await;
                    return Err(ManagerError::ConnectFailed);
                }
                _ => {}
            }
        }
    }

    /// Stops a session: graceful `StopSession` first, kill after 5 s.
    /// Idempotent — a missing task is `NotFound`.
    pub async fn stop_session(&self, task_id: &str) -> Result<(), ManagerError> {
        let handle = {
            let mut sessions = self.inner.sessions.write().await;
            sessions
                .remove(task_id)
                .ok_or_else(|| ManagerError::NotFound(task_id.to_string()))?
        };

        handle.shutdown.fire();
        handle.cancel_timer();
        info!(task_id = %task_id, "stopping session");

        let stop_msg = encode(&IpcMessage::StopSession(StopSessionPayload {
            task_id: task_id.to_string(),
            reason: "requested by parent".to_string(),
        }))
        .context("failed to encode STOP_SESSION")?;
        if let Err(e) = handle.write_frame(&stop_msg).await {
            warn!(task_id = %task_id, error = %e, "failed to send STOP_SESSION, will force kill");
        }

        let mut exited = handle.exited.clone();
        match timeout(STOP_GRACE, exited.wait_for(|done| *done)).await {
            Ok(_) => info!(task_id = %task_id, "child exited gracefully"),
            Err(_) => {
                warn!(task_id = %task_id, "child did not exit, killing");
                let _ = handle.kill_tx.try_send(());
            }
        }
        Ok(())
    }

    pub async fn get_session(&self, task_id: &str) -> Option<Arc<SessionHandle>> {
        self.inner.sessions.read().await.get(task_id).cloned()
    }

    pub async fn all_sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.inner.sessions.read().await.values().cloned().collect()
    }

    /// Task ids of sessions whose id starts with `prefix` (one session per
    /// translation target shares the translator task id as its prefix).
    pub async fn session_ids_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.inner
            .sessions
            .read()
            .await
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Stops every live session.
    pub async fn shutdown(&self) {
        info!("shutting down all sessions");
        let task_ids: Vec<String> = self.inner.sessions.read().await.keys().cloned().collect();
        for task_id in task_ids {
            if let Err(e) = self.stop_session(&task_id).await {
                debug!(task_id = %task_id, error = %e, "shutdown stop");
            }
        }
    }

    async fn handle_unexpected_exit(&self, handle: &Arc<SessionHandle>) {
        handle.set_status(SessionStatus::Failed, None).await;
        handle.cancel_timer();
        self.inner.sessions.write().await.remove(&handle.task_id);
    }
}

/// Mirrors the child's stderr into our logs, line by line.
async fn log_child_stderr(task_id: String, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "child", task_id = %task_id, "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(task_id = %task_id, error = %e, "child stderr closed");
                break;
            }
        }
    }
}

/// Applies the child's IPC stream to the handle. Malformed messages are
/// logged and skipped; transport errors end the loop (the exit waiter
/// owns cleanup).
async fn read_child_messages(handle: Arc<SessionHandle>, stdout: tokio::process::ChildStdout) {
    let mut reader = FrameReader::new(stdout);
    loop {
        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(CodecError::Closed) => {
                info!(task_id = %handle.task_id, "child stdout closed");
                return;
            }
            Err(e) => {
                warn!(task_id = %handle.task_id, error = %e, "error reading from child");
                return;
            }
        };

        match crate::ipc::decode(&frame) {
            Err(e) => warn!(task_id = %handle.task_id, error = %e, "bad IPC message from child"),
            Ok(None) => {
                warn!(task_id = %handle.task_id, "unknown IPC message type from child, ignoring")
            }
            Ok(Some(IpcMessage::StatusUpdate(status))) => {
                info!(
                    task_id = %handle.task_id,
                    status = status.status.as_str(),
                    anam_uid = status.anam_uid,
                    "{}",
                    status.message
                );
                let uid = (status.anam_uid != 0).then_some(status.anam_uid);
                handle.set_status(status.status, uid).await;
            }
            Ok(Some(IpcMessage::LogMessage(log))) => match log.level {
                LogLevel::Debug => debug!(target: "child", task_id = %handle.task_id, "{}", log.message),
                LogLevel::Info => info!(target: "child", task_id = %handle.task_id, "{}", log.message),
                LogLevel::Warn => warn!(target: "child", task_id = %handle.task_id, "{}", log.message),
                LogLevel::Error => error!(target: "child", task_id = %handle.task_id, "{}", log.message),
            },
            Ok(Some(IpcMessage::ErrorResponse(err))) => {
                warn!(
                    task_id = %handle.task_id,
                    code = %err.error_code,
                    fatal = err.fatal,
                    "{}",
                    err.message
                );
                if err.fatal {
                    handle.set_status(SessionStatus::Failed, None).await;
                }
            }
            Ok(Some(other)) => {
                warn!(
                    task_id = %handle.task_id,
                    message_type = ?other.message_type(),
                    "unexpected IPC message direction, ignoring"
                );
            }
        }
    }
}

/// Owns the child process until it exits. A kill request aborts the
/// grace period; an exit without the shutdown latch set is a crash.
async fn wait_child_exit(
    manager: SessionManager,
    handle: Arc<SessionHandle>,
    mut child: tokio::process::Child,
    mut kill_rx: mpsc::Receiver<()>,
    exit_tx: watch::Sender<bool>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx.recv() => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    let _ = exit_tx.send(true);

    if handle.shutdown.is_fired() {
        debug!(task_id = %handle.task_id, ?status, "child exited after stop");
        return;
    }

    warn!(task_id = %handle.task_id, ?status, "child process exited unexpectedly");
    manager.handle_unexpected_exit(&handle).await;
}
