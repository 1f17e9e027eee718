use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::protocol::{
    self, AgoraSettings, Environment, PersonaConfig, SessionTokenRequest, SessionTokenResponse,
};
use super::{AvatarSession, VoiceSink};
use crate::sync::Latch;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between `init` and the first audio; the avatar needs setup time.
const INIT_SETTLE: Duration = Duration::from_millis(500);

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct AnamConfig {
    pub base_url: String,
    pub api_key: String,
    pub avatar_id: String,
    pub app_id: String,
    pub channel: String,
    pub uid: u32,
    pub token: String,
    pub quality: String,
    pub video_encoding: String,
    /// Development convenience only; production keeps TLS verification on.
    pub insecure_tls: bool,
}

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    Message,
>;

/// State shared with the heartbeat/receive tasks and handed out as the
/// [`VoiceSink`]. All WebSocket writes go through one mutex so command
/// framing cannot interleave.
struct Shared {
    writer: Mutex<Option<WsSink>>,
    stop: Latch,
    failure: Arc<Latch>,
}

impl Shared {
    async fn send_command(&self, command: Value) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink
                .send(Message::Text(command.to_string()))
                .await
                .context("websocket send failed"),
            None => bail!("not connected to Anam"),
        }
    }
}

#[async_trait]
impl VoiceSink for Shared {
    async fn send_voice(&self, pcm: &[u8], sample_rate: u32) -> Result<()> {
        self.send_command(protocol::voice_command(pcm, sample_rate))
            .await
    }

    async fn send_voice_end(&self) -> Result<()> {
        debug!("sending voice_end");
        self.send_command(protocol::voice_end_command()).await
    }
}

/// Client for one Anam streaming session: two HTTP posts, then a
/// WebSocket that carries `init`/`voice`/`voice_end`/`heartbeat` commands.
pub struct AnamClient {
    config: AnamConfig,
    shared: Arc<Shared>,
    session_id: String,
    tasks: Vec<JoinHandle<()>>,
}

impl AnamClient {
    pub fn new(config: AnamConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                writer: Mutex::new(None),
                stop: Latch::new(),
                failure: Arc::new(Latch::new()),
            }),
            session_id: String::new(),
            tasks: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Runs the full handshake and leaves the session ready for audio.
    pub async fn start_session(&mut self) -> Result<()> {
        let http = reqwest::Client::builder()
            .timeout(HANDSHAKE_TIMEOUT)
            .danger_accept_invalid_certs(self.config.insecure_tls)
            .build()
            .context("failed to build http client")?;

        // Step 1: session token. The request carries the full conference
        // configuration the avatar will join with.
        let token_url = format!("{}/auth/session-token", self.config.base_url);
        let request = SessionTokenRequest {
            persona_config: PersonaConfig {
                avatar_id: self.config.avatar_id.clone(),
            },
            environment: Environment {
                agora_settings: AgoraSettings {
                    app_id: self.config.app_id.clone(),
                    token: self.config.token.clone(),
                    channel: self.config.channel.clone(),
                    uid: self.config.uid.to_string(),
                    quality: self.config.quality.clone(),
                    video_encoding: self.config.video_encoding.clone(),
                    enable_string_uids: false,
                    activity_idle_timeout: 120,
                },
            },
        };

        info!(url = %token_url, "requesting Anam session token");
        let response = http
            .post(&token_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .context("session token request failed")?;
        if !matches!(response.status().as_u16(), 200 | 201) {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("session token request failed: {status} - {body}");
        }
        let token: SessionTokenResponse = response
            .json()
            .await
            .context("failed to parse session token response")?;

        // Step 2: engine session, authorized by the session token.
        let session_url = format!("{}/engine/session", self.config.base_url);
        info!(url = %session_url, "creating Anam engine session");
        let response = http
            .post(&session_url)
            .bearer_auth(&token.session_token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("engine session request failed")?;
        if !matches!(response.status().as_u16(), 200 | 201) {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("engine session creation failed: {status} - {body}");
        }
        let session: protocol::EngineSessionResponse = response
            .json()
            .await
            .context("failed to parse engine session response")?;

        self.session_id = session.session_id.clone();
        let ws_url = match session.websocket_endpoint() {
            Some(url) => url.to_string(),
            None => bail!("no WebSocket address provided by Anam"),
        };
        info!(session_id = %self.session_id, ws = %ws_url, "Anam session created");

        // Step 3: dial the WebSocket, following one redirect if the server
        // answers the upgrade with 3xx.
        let stream = self.dial(&ws_url).await?;
        let (sink, source) = stream.split();
        *self.shared.writer.lock().await = Some(sink);

        // Step 4: init, then give the avatar time to set up before audio.
        let init = protocol::init_command(
            &self.session_id,
            &self.config.avatar_id,
            &self.config.quality,
            &self.config.video_encoding,
            &self.config.app_id,
            &self.config.token,
            &self.config.channel,
            self.config.uid,
        );
        self.shared
            .send_command(init)
            .await
            .context("failed to send init command")?;
        info!(uid = self.config.uid, channel = %self.config.channel, "init sent, settling");
        tokio::time::sleep(INIT_SETTLE).await;

        self.tasks.push(spawn_receive_loop(self.shared.clone(), source));
        self.tasks.push(spawn_heartbeat(self.shared.clone()));

        Ok(())
    }

    async fn dial(
        &self,
        ws_url: &str,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        match timeout(HANDSHAKE_TIMEOUT, connect_async(ws_url))
            .await
            .context("websocket dial timed out")?
        {
            Ok((stream, _)) => Ok(stream),
            Err(WsError::Http(response))
                if matches!(response.status().as_u16(), 301 | 302 | 307 | 308) =>
            {
                let location = response
                    .headers()
                    .get("Location")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if location.is_empty() {
                    bail!("websocket redirect without Location header");
                }
                let target = protocol::resolve_redirect(ws_url, location);
                info!(target = %target, "following websocket redirect");
                let (stream, _) = timeout(HANDSHAKE_TIMEOUT, connect_async(&target))
                    .await
                    .context("websocket dial timed out")?
                    .context("websocket connect failed after redirect")?;
                Ok(stream)
            }
            Err(e) => Err(e).context("websocket connect failed"),
        }
    }

    /// Closes the session: stops the background tasks and sends a normal
    /// close frame before dropping the connection.
    pub async fn close(&mut self) {
        self.shared.stop.fire();

        let mut writer = self.shared.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                })))
                .await;
            let _ = sink.close().await;
        }
        drop(writer);

        for task in self.tasks.drain(..) {
            let _ = timeout(Duration::from_secs(2), task).await;
        }
        info!("Anam connection closed");
    }
}

#[async_trait]
impl AvatarSession for AnamClient {
    async fn connect(&mut self) -> Result<()> {
        self.start_session().await
    }

    fn voice_sink(&self) -> Arc<dyn VoiceSink> {
        self.shared.clone()
    }

    fn failure(&self) -> Arc<Latch> {
        self.shared.failure.clone()
    }

    async fn close(&mut self) {
        AnamClient::close(self).await
    }
}

/// Drains inbound frames. The protocol treats them as opaque; the only
/// actionable signal is the socket dying, which fires the failure latch.
fn spawn_receive_loop(
    shared: Arc<Shared>,
    mut source: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shared.stop.wait() => break,
                message = source.next() => match message {
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "avatar closed the websocket");
                        if !shared.stop.is_fired() {
                            shared.failure.fire();
                        }
                        break;
                    }
                    Some(Ok(message)) => {
                        if let Message::Text(text) = message {
                            debug!(%text, "avatar message");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "avatar websocket read error");
                        if !shared.stop.is_fired() {
                            shared.failure.fire();
                        }
                        break;
                    }
                    None => {
                        if !shared.stop.is_fired() {
                            shared.failure.fire();
                        }
                        break;
                    }
                },
            }
        }
    })
}

fn spawn_heartbeat(shared: Arc<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shared.stop.wait() => break,
                _ = ticker.tick() => {
                    if let Err(e) = shared.send_command(protocol::heartbeat_command()).await {
                        warn!(error = %e, "failed to send heartbeat");
                    }
                }
            }
        }
    })
}
