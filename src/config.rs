use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::audio::VadConfig;

/// Parent-process configuration. Every key is env-overridable; an
/// optional `config.*` file can seed the same keys.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app_id: String,

    /// Used by the local-dev token stub only.
    #[serde(default)]
    pub app_certificate: String,

    #[serde(default = "default_palabra_base_url")]
    pub palabra_base_url: String,
    #[serde(default)]
    pub palabra_client_id: String,
    #[serde(default)]
    pub palabra_client_secret: String,

    /// Hard session cap in minutes.
    #[serde(default = "default_session_timeout_minutes")]
    pub palabra_session_timeout_minutes: u64,
    /// Child-side silence cutoff in seconds.
    #[serde(default = "default_idle_timeout_seconds")]
    pub palabra_idle_timeout_seconds: u64,

    #[serde(default)]
    pub anam_base_url: String,
    #[serde(default)]
    pub anam_api_key: String,
    #[serde(default)]
    pub anam_avatar_id: String,
    #[serde(default = "default_quality")]
    pub anam_quality: String,
    #[serde(default = "default_video_encoding")]
    pub anam_video_encoding: String,

    /// When on, Start spawns one avatar child per target and returns the
    /// avatar uids to clients instead of the translator uids.
    #[serde(default = "default_true")]
    pub avatar_mode: bool,

    /// Development convenience; leave off in production.
    #[serde(default)]
    pub insecure_tls: bool,

    #[serde(default = "default_http_bind")]
    pub http_bind: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Explicit child binary path; otherwise resolved at startup.
    #[serde(default)]
    pub bot_worker_path: Option<String>,
    /// Appended to the child's LD_LIBRARY_PATH for the conference SDK.
    #[serde(default = "default_sdk_lib_path")]
    pub sdk_lib_path: String,
}

fn default_palabra_base_url() -> String {
    "https://api.palabra.ai".to_string()
}

fn default_session_timeout_minutes() -> u64 {
    10
}

fn default_idle_timeout_seconds() -> u64 {
    60
}

fn default_quality() -> String {
    "high".to_string()
}

fn default_video_encoding() -> String {
    "H264".to_string()
}

fn default_true() -> bool {
    true
}

fn default_http_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_sdk_lib_path() -> String {
    "/usr/local/lib:/opt/agora_sdk".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default())
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_id.is_empty() {
            bail!("APP_ID is required");
        }
        if self.avatar_mode && (self.anam_base_url.is_empty() || self.anam_api_key.is_empty()) {
            bail!("ANAM_BASE_URL and ANAM_API_KEY are required in avatar mode");
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.palabra_session_timeout_minutes.max(1) * 60)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.palabra_idle_timeout_seconds.max(1))
    }

    /// Child binary: explicit override, then `./bot_worker`, then the
    /// installation path.
    pub fn worker_path(&self) -> PathBuf {
        if let Some(path) = &self.bot_worker_path {
            return PathBuf::from(path);
        }
        let local = PathBuf::from("./bot_worker");
        if local.exists() {
            local
        } else {
            PathBuf::from("/usr/local/bin/bot_worker")
        }
    }
}

// The child process reads its knobs straight from the environment it
// inherited; it never loads the full parent configuration.

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

pub fn idle_timeout_from_env() -> Duration {
    let seconds: u64 = env_parse("PALABRA_IDLE_TIMEOUT_SECONDS")
        .filter(|&s| s > 0)
        .unwrap_or(default_idle_timeout_seconds());
    Duration::from_secs(seconds)
}

pub fn vad_config_from_env() -> VadConfig {
    let defaults = VadConfig::default();
    VadConfig {
        rms_threshold: env_parse("VAD_RMS_THRESHOLD").unwrap_or(defaults.rms_threshold),
        pre_roll_frames: env_parse("VAD_PRE_ROLL_FRAMES")
            .filter(|&n: &usize| n > 0)
            .unwrap_or(defaults.pre_roll_frames),
        silence_tail_frames: env_parse("VAD_SILENCE_TAIL_FRAMES")
            .filter(|&n: &u32| n > 0)
            .unwrap_or(defaults.silence_tail_frames),
    }
}

pub fn debug_pcm_path_from_env() -> Option<PathBuf> {
    std::env::var("ANAM_DEBUG_PCM").ok().map(PathBuf::from)
}

pub fn quality_from_env() -> String {
    std::env::var("ANAM_QUALITY").unwrap_or_else(|_| default_quality())
}

pub fn video_encoding_from_env() -> String {
    std::env::var("ANAM_VIDEO_ENCODING").unwrap_or_else(|_| default_video_encoding())
}

pub fn insecure_tls_from_env() -> bool {
    matches!(
        std::env::var("INSECURE_TLS").as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE")
    )
}
