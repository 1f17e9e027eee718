use tokio::sync::mpsc;
use tracing::error;

use crate::ipc::{
    encode, ErrorPayload, IpcMessage, LogLevel, LogPayload, SessionStatus, StatusPayload,
};

/// Outbound IPC funnel for one session. All status/log/error traffic is
/// encoded here and drained by a single writer task, so envelopes reach
/// the parent in emission order.
#[derive(Clone)]
pub struct EventSink {
    task_id: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl EventSink {
    pub fn new(task_id: String, tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { task_id, tx }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    fn send(&self, message: IpcMessage) {
        match encode(&message) {
            // A closed channel means the writer is gone; nothing to do.
            Ok(bytes) => {
                let _ = self.tx.send(bytes);
            }
            Err(e) => error!(error = %e, "failed to encode IPC message"),
        }
    }

    pub fn status(&self, status: SessionStatus, message: &str, anam_uid: u32) {
        self.send(IpcMessage::StatusUpdate(StatusPayload {
            task_id: self.task_id.clone(),
            status,
            message: message.to_string(),
            anam_uid,
        }));
    }

    pub fn log(&self, level: LogLevel, message: String) {
        self.send(IpcMessage::LogMessage(LogPayload {
            task_id: self.task_id.clone(),
            level,
            message,
        }));
    }

    pub fn error(&self, code: &str, message: &str, fatal: bool) {
        self.send(IpcMessage::ErrorResponse(ErrorPayload {
            task_id: self.task_id.clone(),
            error_code: code.to_string(),
            message: message.to_string(),
            fatal,
        }));
    }
}
