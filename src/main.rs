use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use avatar_bridge::config::Config;
use avatar_bridge::control::ControlSurface;
use avatar_bridge::http::{create_router, AppState};
use avatar_bridge::manager::SessionManager;
use avatar_bridge::palabra::PalabraClient;
use avatar_bridge::token::DevTokenMinter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Arc::new(Config::load().context("failed to load configuration")?);
    config.validate()?;

    info!("avatar-bridge control plane starting");

    let palabra = PalabraClient::new(
        config.palabra_base_url.clone(),
        config.palabra_client_id.clone(),
        config.palabra_client_secret.clone(),
        config.insecure_tls,
    )?;
    let manager = SessionManager::new(
        config.worker_path(),
        config.session_timeout(),
        config.sdk_lib_path.clone(),
    );
    let minter = Arc::new(DevTokenMinter::new(config.app_certificate.clone()));
    let control = Arc::new(ControlSurface::new(
        config.clone(),
        palabra,
        manager,
        minter,
    ));

    let app = create_router(AppState::new(control.clone()));

    let addr = format!("{}:{}", config.http_bind, config.http_port);
    info!("listening on http://{addr}");
    info!("   POST   /palabra/translations/start");
    info!("   POST   /palabra/translations/stop");
    info!("   GET    /palabra/translations");
    info!("   GET    /palabra/sessions");
    info!("   GET    /health");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Drain every live session before exit.
    control.shutdown().await;
    info!("avatar-bridge stopped");

    Ok(())
}
