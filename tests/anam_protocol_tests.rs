// Avatar wire-protocol tests: handshake shapes, WebSocket address
// probing, redirects, and command JSON.

use avatar_bridge::anam::protocol::{
    heartbeat_command, init_command, resolve_redirect, voice_command, voice_end_command,
    AgoraSettings, EngineSessionResponse, Environment, PersonaConfig, SessionTokenRequest,
};
use base64::Engine;

// ── websocket address probing ──

#[test]
fn test_ws_probe_order_first_field_wins() {
    let response: EngineSessionResponse = serde_json::from_value(serde_json::json!({
        "sessionId": "s1",
        "websocketAddress": "wss://a.example/ws",
        "websocketUrl": "wss://b.example/ws",
        "webSocketAddress": "wss://c.example/ws",
        "webSocketUrl": "wss://d.example/ws",
    }))
    .unwrap();
    assert_eq!(response.websocket_endpoint(), Some("wss://a.example/ws"));
}

#[test]
fn test_ws_probe_skips_empty_fields() {
    let response: EngineSessionResponse = serde_json::from_value(serde_json::json!({
        "sessionId": "s1",
        "websocketAddress": "",
        "webSocketUrl": "wss://d.example/ws",
    }))
    .unwrap();
    assert_eq!(response.websocket_endpoint(), Some("wss://d.example/ws"));
}

#[test]
fn test_ws_probe_each_spelling_is_accepted() {
    for field in [
        "websocketAddress",
        "websocketUrl",
        "webSocketAddress",
        "webSocketUrl",
    ] {
        let response: EngineSessionResponse = serde_json::from_value(serde_json::json!({
            "sessionId": "s1",
            field: "wss://x.example/ws",
        }))
        .unwrap();
        assert_eq!(
            response.websocket_endpoint(),
            Some("wss://x.example/ws"),
            "field {field} not probed"
        );
    }
}

#[test]
fn test_ws_probe_none_when_absent() {
    let response: EngineSessionResponse =
        serde_json::from_value(serde_json::json!({"sessionId": "s1"})).unwrap();
    assert!(response.websocket_endpoint().is_none());
}

// ── redirects ──

#[test]
fn test_absolute_redirect_used_verbatim() {
    let target = resolve_redirect("wss://connect-eu.anam.ai/v1/ws", "wss://other.anam.ai/v2/ws");
    assert_eq!(target, "wss://other.anam.ai/v2/ws");
}

#[test]
fn test_relative_redirect_keeps_original_host() {
    let target = resolve_redirect("wss://connect-eu.anam.ai/v1/ws?x=1", "/v2/ws");
    assert_eq!(target, "wss://connect-eu.anam.ai/v2/ws");
}

// ── handshake request shape ──

#[test]
fn test_session_token_request_is_camel_case() {
    let request = SessionTokenRequest {
        persona_config: PersonaConfig {
            avatar_id: "avatar-1".to_string(),
        },
        environment: Environment {
            agora_settings: AgoraSettings {
                app_id: "app".to_string(),
                token: "tok".to_string(),
                channel: "C".to_string(),
                uid: "4000".to_string(),
                quality: "high".to_string(),
                video_encoding: "H264".to_string(),
                enable_string_uids: false,
                activity_idle_timeout: 120,
            },
        },
    };

    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["personaConfig"]["avatarId"], "avatar-1");
    let settings = &value["environment"]["agoraSettings"];
    assert_eq!(settings["appId"], "app");
    assert_eq!(settings["videoEncoding"], "H264");
    assert_eq!(settings["enableStringUids"], false);
    assert_eq!(settings["activityIdleTimeout"], 120);
    assert_eq!(settings["uid"], "4000");
}

// ── websocket commands ──

#[test]
fn test_init_command_shape() {
    let init = init_command("s1", "avatar-1", "high", "H264", "app", "tok", "C", 4000);
    assert_eq!(init["command"], "init");
    assert_eq!(init["version"], "1.0");
    assert_eq!(init["session_id"], "s1");
    assert_eq!(init["avatar_id"], "avatar-1");
    assert_eq!(init["activity_idle_timeout"], 120);
    assert_eq!(init["agora_settings"]["app_id"], "app");
    assert_eq!(init["agora_settings"]["uid"], "4000");
    assert_eq!(init["agora_settings"]["enable_string_uid"], false);
    assert!(!init["event_id"].as_str().unwrap().is_empty());
}

#[test]
fn test_voice_command_carries_base64_pcm() {
    let pcm: Vec<u8> = (0..480).map(|i| (i % 251) as u8).collect();
    let voice = voice_command(&pcm, 24_000);

    assert_eq!(voice["command"], "voice");
    assert_eq!(voice["sample_rate"], 24_000);
    assert_eq!(voice["encoding"], "PCM16");

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(voice["audio"].as_str().unwrap())
        .unwrap();
    assert_eq!(decoded, pcm);
}

#[test]
fn test_voice_end_command_shape() {
    let end = voice_end_command();
    assert_eq!(end["command"], "voice_end");
    assert!(end["event_id"].is_string());
}

#[test]
fn test_heartbeat_has_millisecond_timestamp() {
    let heartbeat = heartbeat_command();
    assert_eq!(heartbeat["command"], "heartbeat");
    let ts = heartbeat["timestamp"].as_i64().unwrap();
    // Sanity: on or after 2020-01-01 in milliseconds.
    assert!(ts > 1_577_836_800_000);
}

#[test]
fn test_event_ids_are_fresh_per_command() {
    let a = voice_end_command();
    let b = voice_end_command();
    assert_ne!(a["event_id"], b["event_id"]);
}
