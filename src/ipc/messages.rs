use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Message discriminator carried in every envelope.
///
/// Unknown values decode to `Unknown` so a newer peer can add types without
/// breaking older workers; readers log and skip those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    StartSession,
    StopSession,
    StatusUpdate,
    LogMessage,
    ErrorResponse,
    #[serde(other)]
    Unknown,
}

/// Session lifecycle states reported by the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Initializing,
    ConnectingAnam,
    ConnectingAgora,
    Connected,
    Streaming,
    Disconnecting,
    Disconnected,
    Failed,
    #[serde(other)]
    Unknown,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initializing => "INITIALIZING",
            SessionStatus::ConnectingAnam => "CONNECTING_ANAM",
            SessionStatus::ConnectingAgora => "CONNECTING_AGORA",
            SessionStatus::Connected => "CONNECTED",
            SessionStatus::Streaming => "STREAMING",
            SessionStatus::Disconnecting => "DISCONNECTING",
            SessionStatus::Disconnected => "DISCONNECTED",
            SessionStatus::Failed => "FAILED",
            SessionStatus::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Everything the child needs to run one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionPayload {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSessionPayload {
    pub task_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub task_id: String,
    pub status: SessionStatus,
    pub message: String,
    pub anam_uid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPayload {
    pub task_id: String,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub task_id: String,
    pub error_code: String,
    pub message: String,
    pub fatal: bool,
}

/// A fully-typed IPC message.
#[derive(Debug, Clone)]
pub enum IpcMessage {
    StartSession(StartSessionPayload),
    StopSession(StopSessionPayload),
    StatusUpdate(StatusPayload),
    LogMessage(LogPayload),
    ErrorResponse(ErrorPayload),
}

impl IpcMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            IpcMessage::StartSession(_) => MessageType::StartSession,
            IpcMessage::StopSession(_) => MessageType::StopSession,
            IpcMessage::StatusUpdate(_) => MessageType::StatusUpdate,
            IpcMessage::LogMessage(_) => MessageType::LogMessage,
            IpcMessage::ErrorResponse(_) => MessageType::ErrorResponse,
        }
    }
}

/// Self-describing wire envelope: the payload is the base64 of the body
/// JSON, so the envelope can always be parsed even when the body cannot.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    message_type: MessageType,
    payload: String,
}

/// Encodes a message into envelope bytes suitable for one frame.
pub fn encode(msg: &IpcMessage) -> Result<Vec<u8>> {
    let body = match msg {
        IpcMessage::StartSession(p) => serde_json::to_vec(p),
        IpcMessage::StopSession(p) => serde_json::to_vec(p),
        IpcMessage::StatusUpdate(p) => serde_json::to_vec(p),
        IpcMessage::LogMessage(p) => serde_json::to_vec(p),
        IpcMessage::ErrorResponse(p) => serde_json::to_vec(p),
    }
    .context("failed to serialize message body")?;

    let envelope = Envelope {
        message_type: msg.message_type(),
        payload: base64::engine::general_purpose::STANDARD.encode(body),
    };

    Ok(serde_json::to_vec(&envelope).context("failed to serialize envelope")?)
}

/// Decodes envelope bytes into a typed message.
///
/// Returns `Ok(None)` for unknown message types (forward compatibility —
/// callers log and continue). Malformed envelopes or bodies are errors;
/// callers are expected to log and continue with the next frame.
pub fn decode(bytes: &[u8]) -> Result<Option<IpcMessage>> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).context("failed to parse envelope")?;

    let body = base64::engine::general_purpose::STANDARD
        .decode(&envelope.payload)
        .context("failed to decode envelope payload")?;

    let msg = match envelope.message_type {
        MessageType::StartSession => IpcMessage::StartSession(
            serde_json::from_slice(&body).context("bad START_SESSION payload")?,
        ),
        MessageType::StopSession => IpcMessage::StopSession(
            serde_json::from_slice(&body).context("bad STOP_SESSION payload")?,
        ),
        MessageType::StatusUpdate => IpcMessage::StatusUpdate(
            serde_json::from_slice(&body).context("bad STATUS_UPDATE payload")?,
        ),
        MessageType::LogMessage => IpcMessage::LogMessage(
            serde_json::from_slice(&body).context("bad LOG_MESSAGE payload")?,
        ),
        MessageType::ErrorResponse => IpcMessage::ErrorResponse(
            serde_json::from_slice(&body).context("bad ERROR_RESPONSE payload")?,
        ),
        MessageType::Unknown => return Ok(None),
    };

    Ok(Some(msg))
}
