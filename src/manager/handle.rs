use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::ipc::{CodecError, FrameWriter, SessionStatus};
use crate::sync::Latch;

/// Snapshot of one session for status listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub task_id: String,
    pub status: SessionStatus,
    pub anam_uid: u32,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct SessionState {
    status: SessionStatus,
    anam_uid: u32,
}

/// Parent-side record of one child process. The handle owns the stdin
/// writer; the child process itself is owned by the exit-waiter task,
/// which is told to kill it through `kill_tx`.
pub struct SessionHandle {
    pub task_id: String,
    pub start_time: DateTime<Utc>,
    state: RwLock<SessionState>,
    writer: FrameWriter<ChildStdin>,
    /// Set before a manager-initiated stop so the exit waiter can tell a
    /// requested exit from a crash.
    pub(crate) shutdown: Latch,
    pub(crate) exited: watch::Receiver<bool>,
    pub(crate) kill_tx: mpsc::Sender<()>,
    timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub(crate) fn new(
        task_id: String,
        writer: FrameWriter<ChildStdin>,
        exited: watch::Receiver<bool>,
        kill_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            task_id,
            start_time: Utc::now(),
            state: RwLock::new(SessionState {
                status: SessionStatus::Initializing,
                anam_uid: 0,
            }),
            writer,
            shutdown: Latch::new(),
            exited,
            kill_tx,
            timer: std::sync::Mutex::new(None),
        }
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.read().await.status
    }

    pub async fn info(&self) -> SessionInfo {
        let state = *self.state.read().await;
        SessionInfo {
            task_id: self.task_id.clone(),
            status: state.status,
            anam_uid: state.anam_uid,
            start_time: self.start_time,
        }
    }

    pub(crate) async fn set_status(&self, status: SessionStatus, anam_uid: Option<u32>) {
        let mut state = self.state.write().await;
        state.status = status;
        if let Some(uid) = anam_uid {
            state.anam_uid = uid;
        }
    }

    pub(crate) async fn write_frame(&self, bytes: &[u8]) -> Result<(), CodecError> {
        self.writer.write_frame(bytes).await
    }

    pub(crate) fn set_timer(&self, timer: JoinHandle<()>) {
        *self.timer.lock().unwrap() = Some(timer);
    }

    pub(crate) fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.abort();
        }
    }
}
