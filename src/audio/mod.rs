//! Audio path: PCM conversion, 16→24 kHz resampling, and the voice gate
//! that decides which frames reach the avatar.

pub mod resample;
pub mod vad;

pub use resample::{pcm_bytes_to_samples, samples_to_pcm_bytes, upsample_16k_to_24k};
pub use vad::{mean_square, GateResult, VadConfig, VoiceGate};
