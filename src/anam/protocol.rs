//! Anam wire types.
//!
//! The HTTP handshake uses camelCase JSON; the WebSocket command protocol
//! uses snake_case with a fresh `event_id` per command.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Body of `POST {base}/auth/session-token`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenRequest {
    pub persona_config: PersonaConfig,
    pub environment: Environment,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaConfig {
    pub avatar_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub agora_settings: AgoraSettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgoraSettings {
    pub app_id: String,
    pub token: String,
    pub channel: String,
    pub uid: String,
    pub quality: String,
    pub video_encoding: String,
    pub enable_string_uids: bool,
    pub activity_idle_timeout: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenResponse {
    pub session_token: String,
}

/// Response of `POST {base}/engine/session`. The WebSocket address field
/// name varies across server versions, so all four spellings are carried.
#[derive(Debug, Default, Deserialize)]
pub struct EngineSessionResponse {
    #[serde(rename = "sessionId", default)]
    pub session_id: String,
    #[serde(rename = "websocketAddress", default)]
    pub websocket_address: Option<String>,
    #[serde(rename = "websocketUrl", default)]
    pub websocket_url: Option<String>,
    #[serde(rename = "webSocketAddress", default)]
    pub web_socket_address: Option<String>,
    #[serde(rename = "webSocketUrl", default)]
    pub web_socket_url: Option<String>,
}

impl EngineSessionResponse {
    /// Probes the four known field spellings in order; first non-empty
    /// wins. Do not collapse this to a single field — the inconsistency is
    /// on the server side.
    pub fn websocket_endpoint(&self) -> Option<&str> {
        [
            &self.websocket_address,
            &self.websocket_url,
            &self.web_socket_address,
            &self.web_socket_url,
        ]
        .into_iter()
        .filter_map(|f| f.as_deref())
        .find(|s| !s.is_empty())
    }
}

/// Resolves a redirect `Location` against the original WebSocket URL. A
/// relative location keeps the original host and is forced onto `wss`.
pub fn resolve_redirect(original: &str, location: &str) -> String {
    if !location.starts_with('/') {
        return location.to_string();
    }
    let host = original
        .split_once("//")
        .map(|(_, rest)| rest.split('/').next().unwrap_or(rest))
        .unwrap_or(original);
    format!("wss://{}{}", host, location)
}

fn event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `init` command sent immediately after the WebSocket opens.
#[allow(clippy::too_many_arguments)]
pub fn init_command(
    session_id: &str,
    avatar_id: &str,
    quality: &str,
    video_encoding: &str,
    app_id: &str,
    token: &str,
    channel: &str,
    uid: u32,
) -> Value {
    json!({
        "command": "init",
        "event_id": event_id(),
        "session_id": session_id,
        "avatar_id": avatar_id,
        "quality": quality,
        "version": "1.0",
        "video_encoding": video_encoding,
        "activity_idle_timeout": 120,
        "agora_settings": {
            "app_id": app_id,
            "token": token,
            "channel": channel,
            "uid": uid.to_string(),
            "enable_string_uid": false,
        },
    })
}

/// `voice` command carrying one base64 PCM16 frame.
pub fn voice_command(pcm: &[u8], sample_rate: u32) -> Value {
    json!({
        "command": "voice",
        "audio": base64::engine::general_purpose::STANDARD.encode(pcm),
        "sample_rate": sample_rate,
        "encoding": "PCM16",
        "event_id": event_id(),
    })
}

pub fn voice_end_command() -> Value {
    json!({
        "command": "voice_end",
        "event_id": event_id(),
    })
}

pub fn heartbeat_command() -> Value {
    json!({
        "command": "heartbeat",
        "event_id": event_id(),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    })
}
