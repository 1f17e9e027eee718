// Control-surface tests against a stub translator API (and, for avatar
// mode, the real bot_worker binary plus a stub avatar provider).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use avatar_bridge::config::Config;
use avatar_bridge::control::{ControlError, ControlSurface, StartRequest};
use avatar_bridge::manager::SessionManager;
use avatar_bridge::palabra::PalabraClient;
use avatar_bridge::token::DevTokenMinter;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;

#[derive(Clone, Default)]
struct TranslatorStub {
    starts: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
}

/// Stub translator API: counts calls and hands out task id "T".
async fn spawn_translator_stub(stub: TranslatorStub) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let starts = stub.starts.clone();
    let deletes = stub.deletes.clone();
    let app = Router::new()
        .route(
            "/agora/translations",
            post(move || {
                let starts = starts.clone();
                async move {
                    starts.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"ok": true, "data": {"task_id": "T", "status": "created"}}))
                }
            }),
        )
        .route(
            "/agora/translations/:task_id",
            delete(move || {
                let deletes = deletes.clone();
                async move {
                    deletes.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NO_CONTENT
                }
            }),
        );

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

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

fn test_config(translator: SocketAddr, avatar_mode: bool, anam_base_url: String) -> Config {
    Config {
        app_id: "app".to_string(),
        app_certificate: "cert".to_string(),
        palabra_base_url: format!("http://{translator}"),
        palabra_client_id: "client".to_string(),
        palabra_client_secret: "secret".to_string(),
        palabra_session_timeout_minutes: 10,
        palabra_idle_timeout_seconds: 60,
        anam_base_url,
        anam_api_key: "key".to_string(),
        anam_avatar_id: "avatar-1".to_string(),
        anam_quality: "high".to_string(),
        anam_video_encoding: "H264".to_string(),
        avatar_mode,
        insecure_tls: false,
        http_bind: "127.0.0.1".to_string(),
        http_port: 0,
        bot_worker_path: Some(env!("CARGO_BIN_EXE_bot_worker").to_string()),
        sdk_lib_path: String::new(),
    }
}

fn control_surface(config: Config) -> ControlSurface {
    let config = Arc::new(config);
    let palabra = PalabraClient::new(
        config.palabra_base_url.clone(),
        config.palabra_client_id.clone(),
        config.palabra_client_secret.clone(),
        false,
    )
    .unwrap();
    let manager = SessionManager::new(
        config
            .bot_worker_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap(),
        config.session_timeout(),
        config.sdk_lib_path.clone(),
    );
    let minter = Arc::new(DevTokenMinter::new(config.app_certificate.clone()));
    ControlSurface::new(config, palabra, manager, minter)
}

fn request(targets: &[&str]) -> StartRequest {
    StartRequest {
        channel: "C".to_string(),
        speaker_uid: "100".to_string(),
        source_language: "en".to_string(),
        target_languages: targets.iter().map(|t| t.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_start_returns_translator_streams_without_avatar_mode() {
    let stub = TranslatorStub::default();
    let translator = spawn_translator_stub(stub.clone()).await;
    let control = control_surface(test_config(translator, false, String::new()));

    let response = control.start(request(&["fr"])).await.unwrap();
    assert_eq!(response.task_id, "T");
    assert_eq!(response.streams.len(), 1);
    assert_eq!(response.streams[0].uid, "3000");
    assert_eq!(response.streams[0].language, "fr");
    assert_eq!(stub.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dedup_reuse_skips_the_external_call() {
    let stub = TranslatorStub::default();
    let translator = spawn_translator_stub(stub.clone()).await;
    let control = control_surface(test_config(translator, false, String::new()));

    let first = control.start(request(&["fr"])).await.unwrap();
    let second = control.start(request(&["fr"])).await.unwrap();

    assert_eq!(stub.starts.load(Ordering::SeqCst), 1, "one external call per key");
    assert_eq!(
        serde_json::to_string(&first.streams).unwrap(),
        serde_json::to_string(&second.streams).unwrap(),
        "reuse must return the stored response byte-for-byte"
    );
    assert_eq!(first.task_id, second.task_id);
}

#[tokio::test]
async fn test_concurrent_starts_make_one_external_call() {
    let stub = TranslatorStub::default();
    let translator = spawn_translator_stub(stub.clone()).await;
    let control = Arc::new(control_surface(test_config(translator, false, String::new())));

    let (a, b) = tokio::join!(
        control.start(request(&["fr"])),
        control.start(request(&["fr"]))
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(a.task_id, b.task_id);
    assert_eq!(stub.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_removes_registry_and_calls_delete() {
    let stub = TranslatorStub::default();
    let translator = spawn_translator_stub(stub.clone()).await;
    let control = control_surface(test_config(translator, false, String::new()));

    control.start(request(&["fr"])).await.unwrap();
    assert_eq!(control.list().await.len(), 1);

    control.stop("T").await.unwrap();
    assert_eq!(stub.deletes.load(Ordering::SeqCst), 1);
    assert!(control.list().await.is_empty());

    // Already stopped: not-found, and otherwise a no-op.
    assert!(matches!(
        control.stop("T").await,
        Err(ControlError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_start_rejects_missing_fields() {
    let stub = TranslatorStub::default();
    let translator = spawn_translator_stub(stub.clone()).await;
    let control = control_surface(test_config(translator, false, String::new()));

    let result = control
        .start(StartRequest {
            channel: "C".to_string(),
            speaker_uid: String::new(),
            source_language: "en".to_string(),
            target_languages: vec!["fr".to_string()],
        })
        .await;
    assert!(result.is_err());
    assert_eq!(stub.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_avatar_mode_start_returns_avatar_uids_and_spawns_child() {
    let stub = TranslatorStub::default();
    let translator = spawn_translator_stub(stub.clone()).await;
    let avatar = spawn_avatar_stub().await;
    let control = control_surface(test_config(translator, true, format!("http://{avatar}")));

    let response = control.start(request(&["fr"])).await.unwrap();
    assert_eq!(response.task_id, "T");
    // Clients subscribe to the avatar identity, not the translator.
    assert_eq!(response.streams[0].uid, "4000");
    assert_eq!(response.streams[0].language, "fr");

    // One child session per target, keyed "{task_id}-{index}".
    assert!(control.manager().get_session("T-0").await.is_some());

    control.stop("T").await.unwrap();
    assert!(control.manager().get_session("T-0").await.is_none());
    assert!(control.list().await.is_empty());
    assert_eq!(stub.deletes.load(Ordering::SeqCst), 1);
}
