use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{codes, EventSink};
use crate::anam::AvatarSession;
use crate::audio::VadConfig;
use crate::config;
use crate::ipc::{LogLevel, SessionStatus, StartSessionPayload};
use crate::rtc::{AgoraBot, BotConfig, RtcService};
use crate::sync::Latch;

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub task_id: String,
    pub channel: String,
    pub bot_uid: u32,
    pub bot_token: String,
    pub palabra_uid: u32,
    pub anam_uid: u32,
    pub target_language: String,
    pub idle_timeout: Duration,
    pub vad: VadConfig,
    pub debug_pcm_path: Option<PathBuf>,
}

impl WorkerConfig {
    /// Builds the runtime configuration from the parent's payload plus the
    /// child-side environment knobs.
    pub fn from_payload(payload: &StartSessionPayload) -> Self {
        Self {
            task_id: payload.task_id.clone(),
            channel: payload.channel.clone(),
            bot_uid: payload.bot_uid,
            bot_token: payload.bot_token.clone(),
            palabra_uid: payload.palabra_uid,
            anam_uid: payload.anam_uid,
            target_language: payload.target_language.clone(),
            idle_timeout: config::idle_timeout_from_env(),
            vad: config::vad_config_from_env(),
            debug_pcm_path: config::debug_pcm_path_from_env(),
        }
    }
}

/// One session's orchestrator. Lives for at most one session: connect the
/// avatar, join the conference, then wait for whichever termination
/// trigger fires first.
pub struct BotWorker<A: AvatarSession> {
    config: WorkerConfig,
    avatar: A,
    service: Arc<dyn RtcService>,
    events: EventSink,
}

impl<A: AvatarSession> BotWorker<A> {
    pub fn new(
        config: WorkerConfig,
        avatar: A,
        service: Arc<dyn RtcService>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            avatar,
            service,
            events,
        }
    }

    /// Runs the session to completion. `stop` is the parent-initiated
    /// stop; it takes priority over every other termination trigger.
    pub async fn run(mut self, stop: Arc<Latch>) -> Result<()> {
        let events = self.events.clone();
        let cfg = self.config.clone();

        events.log(
            LogLevel::Info,
            format!("starting bot worker for task {}", cfg.task_id),
        );

        // Step 1: avatar first, so the sink exists before any audio flows.
        events.status(SessionStatus::ConnectingAnam, "Connecting to Anam API", 0);
        if let Err(e) = self.avatar.connect().await {
            let msg = format!("failed to start Anam session: {e:#}");
            events.log(LogLevel::Error, msg.clone());
            events.error(codes::ANAM_CONNECT_FAILED, &msg, true);
            return Err(e).context("Anam connect failed");
        }
        events.log(LogLevel::Info, "Anam client connected".to_string());

        // Step 2: join the conference and subscribe to the translator.
        events.status(
            SessionStatus::ConnectingAgora,
            "Connecting to conference",
            0,
        );
        let mut bot = AgoraBot::new(
            BotConfig {
                channel: cfg.channel.clone(),
                bot_uid: cfg.bot_uid,
                token: cfg.bot_token.clone(),
                target_uid: cfg.palabra_uid,
                vad: cfg.vad.clone(),
                debug_pcm_path: cfg.debug_pcm_path.clone(),
            },
            self.avatar.voice_sink(),
        );
        if let Err(e) = bot.start(self.service.as_ref()).await {
            let msg = format!("failed to start conference bot: {e:#}");
            events.log(LogLevel::Error, msg.clone());
            events.error(codes::AGORA_CONNECT_FAILED, &msg, true);
            self.avatar.close().await;
            return Err(e).context("conference connect failed");
        }
        events.log(
            LogLevel::Info,
            format!("bot connected, subscribed to uid {}", cfg.palabra_uid),
        );

        events.status(SessionStatus::Connected, "Session connected", cfg.anam_uid);
        events.status(
            SessionStatus::Streaming,
            "Audio streaming active",
            cfg.anam_uid,
        );
        events.log(
            LogLevel::Info,
            format!("worker running, idle timeout {:?}", cfg.idle_timeout),
        );

        // Step 3: wait for a termination trigger. Biased so a racing
        // parent stop always wins over target-left, which wins over idle.
        let target_left = bot.target_left();
        let ws_failure = self.avatar.failure();
        let mut idle_check = tokio::time::interval_at(
            tokio::time::Instant::now() + IDLE_CHECK_INTERVAL,
            IDLE_CHECK_INTERVAL,
        );
        loop {
            tokio::select! {
                biased;
                _ = stop.wait() => {
                    events.log(LogLevel::Info, "received stop signal".to_string());
                    break;
                }
                _ = target_left.wait() => {
                    warn!(uid = cfg.palabra_uid, "translator left, stopping");
                    events.error(
                        codes::TARGET_LEFT,
                        &format!("translator uid {} left the channel", cfg.palabra_uid),
                        true,
                    );
                    break;
                }
                _ = ws_failure.wait() => {
                    events.error(codes::WORKER_FAILED, "avatar websocket closed", true);
                    break;
                }
                _ = idle_check.tick() => {
                    let idle = bot.idle_duration();
                    if idle > cfg.idle_timeout {
                        warn!(?idle, timeout = ?cfg.idle_timeout, "session idle, stopping");
                        events.error(
                            codes::IDLE_TIMEOUT,
                            &format!("no audio activity for {:?}", idle),
                            true,
                        );
                        break;
                    }
                }
            }
        }

        // Step 4: teardown in reverse order of startup.
        events.status(
            SessionStatus::Disconnecting,
            "Stopping session",
            cfg.anam_uid,
        );
        bot.stop().await;
        self.avatar.close().await;
        events.status(SessionStatus::Disconnected, "Session stopped", cfg.anam_uid);
        info!(task_id = %cfg.task_id, "worker finished");
        Ok(())
    }
}
