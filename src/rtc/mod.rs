//! Conference SDK boundary.
//!
//! The production implementation is a third-party native library driven
//! over FFI; everything above it talks through these traits so a crash in
//! that library is contained to the child process. The in-tree `loopback`
//! backend implements the same surface for development and tests.

pub mod bot;
pub mod loopback;

use std::sync::Arc;

use anyhow::{bail, Result};

pub use bot::{AgoraBot, BotConfig, IdleClock};
pub use loopback::{LoopbackHandle, LoopbackService};

/// Connection-level options. `auto_subscribe_audio` must stay false for
/// the forwarding bot: it subscribes to exactly one uid by hand.
#[derive(Debug, Clone, Copy)]
pub struct RtcConnectionConfig {
    pub auto_subscribe_audio: bool,
    pub auto_subscribe_video: bool,
}

/// One "before mixing" PCM frame as delivered by the SDK: 10 ms of mono
/// PCM16 at 16 kHz (320 bytes).
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub buffer: Vec<u8>,
    pub samples_per_sec: u32,
}

/// Connection lifecycle callbacks. Invoked from SDK-owned threads; keep
/// implementations non-blocking.
pub trait RtcObserver: Send + Sync {
    fn on_connected(&self, connection: &dyn RtcConnection, channel: &str);
    fn on_disconnected(&self, connection: &dyn RtcConnection, channel: &str);
    fn on_user_joined(&self, connection: &dyn RtcConnection, uid: u32);
    fn on_user_left(&self, connection: &dyn RtcConnection, uid: u32);
}

/// Per-user audio delivery. Runs on the SDK's audio callback thread and
/// must complete well inside one frame period (10 ms).
pub trait AudioFrameObserver: Send + Sync {
    fn on_playback_audio_frame_before_mixing(&self, channel: &str, uid: u32, frame: &PcmFrame);
}

pub trait RtcConnection: Send + Sync {
    fn register_observer(&self, observer: Arc<dyn RtcObserver>);
    fn register_audio_observer(&self, observer: Arc<dyn AudioFrameObserver>);
    fn set_playback_audio_params(&self, channels: u16, sample_rate: u32) -> Result<()>;
    fn subscribe_audio(&self, uid: u32) -> Result<()>;
    fn connect(&self, token: &str, channel: &str, uid: u32) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
}

pub trait RtcService: Send + Sync {
    fn app_id(&self) -> &str;
    fn create_connection(&self, config: RtcConnectionConfig) -> Result<Arc<dyn RtcConnection>>;
    fn release(&self);
}

/// Selects the conference backend for this process. The native SDK
/// backend is linked out of tree; `loopback` is the in-process default
/// for development.
pub fn service_from_env(app_id: &str) -> Result<Arc<dyn RtcService>> {
    let backend = std::env::var("RTC_BACKEND").unwrap_or_default();
    match backend.as_str() {
        "" | "loopback" => Ok(Arc::new(LoopbackService::new(app_id))),
        other => bail!("unknown RTC backend: {other}"),
    }
}
