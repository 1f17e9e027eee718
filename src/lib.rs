pub mod anam;
pub mod audio;
pub mod config;
pub mod control;
pub mod http;
pub mod ipc;
pub mod manager;
pub mod palabra;
pub mod registry;
pub mod rtc;
pub mod sync;
pub mod token;
pub mod worker;

pub use anam::{AnamClient, AnamConfig, AvatarSession, VoiceSink};
pub use audio::{upsample_16k_to_24k, VadConfig, VoiceGate};
pub use config::Config;
pub use control::{ControlSurface, StartRequest, StartResponse};
pub use http::{create_router, AppState};
pub use manager::{SessionLaunch, SessionManager};
pub use registry::{StreamInfo, TaskInfo, TaskRegistry};
