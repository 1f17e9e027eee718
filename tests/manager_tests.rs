// Session-manager tests against the real bot_worker binary. A local
// stub stands in for the avatar provider so children can reach
// STREAMING; the conference side runs on the loopback backend.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use avatar_bridge::ipc::SessionStatus;
use avatar_bridge::manager::{ManagerError, SessionLaunch, SessionManager};
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;

fn worker_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_bot_worker"))
}

fn launch(task_id: &str, anam_base_url: String) -> SessionLaunch {
    SessionLaunch {
        task_id: task_id.to_string(),
        app_id: "app".to_string(),
        channel: "C".to_string(),
        bot_uid: 4500,
        bot_token: "bot-token".to_string(),
        palabra_uid: 3000,
        anam_api_key: "key".to_string(),
        anam_base_url,
        anam_avatar_id: "avatar-1".to_string(),
        anam_uid: 4000,
        anam_token: "anam-token".to_string(),
        target_language: "fr".to_string(),
    }
}

/// Minimal avatar provider: token + engine-session endpoints and a
/// WebSocket that drains whatever the child sends.
async fn spawn_avatar_stub() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ws_url = format!("ws://{addr}/ws");

    let app = Router::new()
        .route(
            "/auth/session-token",
            post(|| async { Json(json!({"sessionToken": "tok"})) }),
        )
        .route(
            "/engine/session",
            post(move || {
                let ws_url = ws_url.clone();
                async move { Json(json!({"sessionId": "s1", "websocketUrl": ws_url})) }
            }),
        )
        .route(
            "/ws",
            get(|ws: WebSocketUpgrade| async {
                ws.on_upgrade(|mut socket| async move {
                    while let Some(Ok(_)) = socket.recv().await {}
                })
                .into_response()
            }),
        );

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_and_stop_session() {
    let stub = spawn_avatar_stub().await;
    let manager = SessionManager::new(worker_path(), Duration::from_secs(600), String::new());

    let handle = manager
        .start_session(launch("T-0", format!("http://{stub}")))
        .await
        .expect("session should connect against the stub");

    let status = handle.status().await;
    assert!(
        matches!(status, SessionStatus::Connected | SessionStatus::Streaming),
        "unexpected status after start: {status:?}"
    );

    // A second start for the same task id must be refused.
    assert!(matches!(
        manager
            .start_session(launch("T-0", format!("http://{stub}")))
            .await,
        Err(ManagerError::AlreadyExists(_))
    ));

    assert!(manager.get_session("T-0").await.is_some());
    assert_eq!(
        manager.session_ids_with_prefix("T-").await,
        vec!["T-0".to_string()]
    );

    manager.stop_session("T-0").await.unwrap();
    assert!(manager.get_session("T-0").await.is_none());

    // Idempotent: a stopped task is simply gone.
    assert!(matches!(
        manager.stop_session("T-0").await,
        Err(ManagerError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_avatar_fails_the_session() {
    let manager = SessionManager::new(worker_path(), Duration::from_secs(600), String::new());

    // Nothing listens on port 9; the child reports ANAM_CONNECT_FAILED
    // and the start surfaces it as a connect failure.
    let result = manager
        .start_session(launch("T-bad", "http://127.0.0.1:9".to_string()))
        .await;
    assert!(
        matches!(result, Err(ManagerError::ConnectFailed)),
        "expected ConnectFailed"
    );

    // The crashed session is removed; a later stop finds nothing. This is
    // the isolation contract: the parent stays up and simply reports
    // not-found.
    assert!(matches!(
        manager.stop_session("T-bad").await,
        Err(ManagerError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hard_duration_cap_stops_the_session() {
    let stub = spawn_avatar_stub().await;
    let manager = SessionManager::new(worker_path(), Duration::from_secs(2), String::new());

    manager
        .start_session(launch("T-cap", format!("http://{stub}")))
        .await
        .expect("session should connect");
    assert!(manager.get_session("T-cap").await.is_some());

    // The one-shot timer fires StopSession from the manager side.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(
        manager.get_session("T-cap").await.is_none(),
        "hard cap should have stopped the session"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_drains_all_sessions() {
    let stub = spawn_avatar_stub().await;
    let manager = SessionManager::new(worker_path(), Duration::from_secs(600), String::new());

    for task_id in ["S-0", "S-1"] {
        manager
            .start_session(launch(task_id, format!("http://{stub}")))
            .await
            .expect("session should connect");
    }
    assert_eq!(manager.all_sessions().await.len(), 2);

    manager.shutdown().await;
    assert!(manager.all_sessions().await.is_empty());
}

#[tokio::test]
async fn test_stop_unknown_session_is_not_found() {
    let manager = SessionManager::new(worker_path(), Duration::from_secs(600), String::new());
    assert!(matches!(
        manager.stop_session("never-started").await,
        Err(ManagerError::NotFound(_))
    ));
}
