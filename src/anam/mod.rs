//! Anam avatar provider: HTTP handshake, WebSocket command protocol, and
//! the session/sink traits the rest of the system talks through.

pub mod client;
pub mod protocol;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::sync::Latch;

pub use client::{AnamClient, AnamConfig};

/// Audio outlet toward the avatar. Implemented by the live WebSocket
/// client; tests substitute a recording sink.
#[async_trait]
pub trait VoiceSink: Send + Sync {
    /// Sends one PCM16 frame. Errors are expected to be logged and the
    /// frame dropped; they do not terminate the session on their own.
    async fn send_voice(&self, pcm: &[u8], sample_rate: u32) -> Result<()>;

    /// Marks the end of an utterance so the avatar can close its mouth.
    async fn send_voice_end(&self) -> Result<()>;
}

/// One avatar session: connect once, stream through the sink, close once.
#[async_trait]
pub trait AvatarSession: Send {
    /// Performs the full handshake; after this returns the sink accepts
    /// audio (the post-init settle delay has already elapsed).
    async fn connect(&mut self) -> Result<()>;

    fn voice_sink(&self) -> Arc<dyn VoiceSink>;

    /// Fires when the WebSocket dies out from under the session.
    fn failure(&self) -> Arc<Latch>;

    async fn close(&mut self);
}
