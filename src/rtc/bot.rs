//! The forwarding bot: joins the conference as a subscriber-only
//! participant, subscribes to exactly the translator uid, and pushes its
//! audio through the voice gate into the avatar sink.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{
    AudioFrameObserver, PcmFrame, RtcConnection, RtcConnectionConfig, RtcObserver, RtcService,
};
use crate::anam::VoiceSink;
use crate::audio::{pcm_bytes_to_samples, VadConfig, VoiceGate};
use crate::sync::Latch;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames queued between the SDK callback thread and the forward task.
/// The callback never blocks; overflow drops frames, which the avatar
/// tolerates as a glitch.
const FRAME_QUEUE: usize = 64;

/// Tracks when audio was last forwarded to the avatar.
pub struct IdleClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl IdleClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        self.last_ms
            .store(self.origin.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    pub fn idle_duration(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::Relaxed)))
    }
}

impl Default for IdleClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub channel: String,
    pub bot_uid: u32,
    pub token: String,
    /// The translator uid whose audio is forwarded; the only subscription
    /// this bot ever makes.
    pub target_uid: u32,
    pub vad: VadConfig,
    /// Raw 24 kHz PCM capture for offline inspection (not part of the
    /// correctness contract).
    pub debug_pcm_path: Option<PathBuf>,
}

pub struct AgoraBot {
    config: BotConfig,
    sink: Arc<dyn VoiceSink>,
    connection: Option<Arc<dyn RtcConnection>>,
    target_left: Arc<Latch>,
    idle: Arc<IdleClock>,
    forward_task: Option<JoinHandle<()>>,
}

impl AgoraBot {
    pub fn new(config: BotConfig, sink: Arc<dyn VoiceSink>) -> Self {
        Self {
            config,
            sink,
            connection: None,
            target_left: Arc::new(Latch::new()),
            idle: Arc::new(IdleClock::new()),
            forward_task: None,
        }
    }

    /// Fires at most once, when the translator uid leaves the channel.
    pub fn target_left(&self) -> Arc<Latch> {
        self.target_left.clone()
    }

    pub fn idle_duration(&self) -> Duration {
        self.idle.idle_duration()
    }

    /// Joins the channel and wires the audio path. Returns once the
    /// connection callback has fired.
    pub async fn start(&mut self, service: &dyn RtcService) -> Result<()> {
        let connection = service.create_connection(RtcConnectionConfig {
            auto_subscribe_audio: false,
            auto_subscribe_video: false,
        })?;

        let connected = Arc::new(Latch::new());
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let observer = Arc::new(BotObserver {
            target_uid: self.config.target_uid,
            connected: connected.clone(),
            target_left: self.target_left.clone(),
            frame_tx,
        });

        connection.register_observer(observer.clone());
        connection.connect(&self.config.token, &self.config.channel, self.config.bot_uid)?;
        info!(
            channel = %self.config.channel,
            uid = self.config.bot_uid,
            "connecting to channel"
        );
        timeout(CONNECT_TIMEOUT, connected.wait())
            .await
            .context("timed out waiting for channel connection")?;

        // Audio parameters and observer go in after the connection is up.
        connection.set_playback_audio_params(1, 16_000)?;
        connection.register_audio_observer(observer);

        let debug_file = self.config.debug_pcm_path.as_ref().and_then(|path| {
            match std::fs::File::create(path) {
                Ok(file) => {
                    info!(path = %path.display(), "recording raw 24kHz PCM");
                    Some(file)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not create PCM debug file");
                    None
                }
            }
        });

        let gate = VoiceGate::new(self.config.vad.clone());
        self.forward_task = Some(tokio::spawn(forward_frames(
            frame_rx,
            gate,
            self.sink.clone(),
            self.idle.clone(),
            debug_file,
        )));

        self.connection = Some(connection);
        info!(
            target = self.config.target_uid,
            "bot ready, waiting for translator audio"
        );
        Ok(())
    }

    /// Disconnects and tears down the forward task.
    pub async fn stop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.disconnect() {
                warn!(error = %e, "disconnect failed");
            }
        }
        if let Some(mut task) = self.forward_task.take() {
            if timeout(Duration::from_secs(1), &mut task).await.is_err() {
                warn!("forward task did not drain in time");
                task.abort();
            }
        }
        info!("bot stopped");
    }
}

struct BotObserver {
    target_uid: u32,
    connected: Arc<Latch>,
    target_left: Arc<Latch>,
    frame_tx: mpsc::Sender<PcmFrame>,
}

impl RtcObserver for BotObserver {
    fn on_connected(&self, _connection: &dyn RtcConnection, channel: &str) {
        info!(channel, "bot connected to channel");
        self.connected.fire();
    }

    fn on_disconnected(&self, _connection: &dyn RtcConnection, channel: &str) {
        info!(channel, "bot disconnected from channel");
    }

    fn on_user_joined(&self, connection: &dyn RtcConnection, uid: u32) {
        debug!(uid, target = self.target_uid, "user joined");
        if uid == self.target_uid {
            match connection.subscribe_audio(uid) {
                Ok(()) => info!(uid, "subscribed to translator audio"),
                Err(e) => warn!(uid, error = %e, "failed to subscribe to translator audio"),
            }
        }
    }

    fn on_user_left(&self, _connection: &dyn RtcConnection, uid: u32) {
        debug!(uid, "user left");
        if uid == self.target_uid && self.target_left.fire() {
            warn!(uid, "translator left the channel");
        }
    }
}

impl AudioFrameObserver for BotObserver {
    fn on_playback_audio_frame_before_mixing(&self, _channel: &str, uid: u32, frame: &PcmFrame) {
        if uid != self.target_uid {
            return;
        }
        if frame.samples_per_sec != 16_000 {
            warn!(
                rate = frame.samples_per_sec,
                "unexpected sample rate (expected 16000)"
            );
        }
        // This runs on the SDK's audio thread: enqueue and get out. A full
        // queue means the forwarder is behind; the frame is dropped.
        if let Err(mpsc::error::TrySendError::Full(_)) = self.frame_tx.try_send(frame.clone()) {
            warn!("forward queue full, dropping frame");
        }
    }
}

async fn forward_frames(
    mut frame_rx: mpsc::Receiver<PcmFrame>,
    mut gate: VoiceGate,
    sink: Arc<dyn VoiceSink>,
    idle: Arc<IdleClock>,
    mut debug_file: Option<std::fs::File>,
) {
    while let Some(frame) = frame_rx.recv().await {
        let samples = pcm_bytes_to_samples(&frame.buffer);
        let result = gate.push(&samples);

        for pcm in &result.send {
            if let Err(e) = sink.send_voice(pcm, 24_000).await {
                warn!(error = %e, "voice send failed, dropping frame");
            }
        }
        if result.transmitted() {
            idle.touch();
            if gate.frames_sent() % 100 == 0 {
                debug!(frames = gate.frames_sent(), "forwarding voice");
            }
        }
        if result.voice_end {
            if let Err(e) = sink.send_voice_end().await {
                warn!(error = %e, "voice_end send failed");
            }
        }
        if let Some(file) = debug_file.as_mut() {
            let _ = file.write_all(&result.upsampled);
        }
    }
}
