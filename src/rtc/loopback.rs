//! In-process conference backend.
//!
//! Implements the SDK surface without any native library: a
//! [`LoopbackHandle`] injects joins, leaves and PCM frames, and selective
//! subscription is honored the same way the real SDK does it (frames from
//! uids the connection never subscribed to are dropped).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use anyhow::Result;
use tracing::debug;

use super::{
    AudioFrameObserver, PcmFrame, RtcConnection, RtcConnectionConfig, RtcObserver, RtcService,
};

#[derive(Default)]
struct LoopbackInner {
    observers: Mutex<Vec<Arc<dyn RtcObserver>>>,
    audio_observers: Mutex<Vec<Arc<dyn AudioFrameObserver>>>,
    subscribed: Mutex<HashSet<u32>>,
    auto_subscribe_audio: Mutex<bool>,
    channel: Mutex<Option<String>>,
    connection: Mutex<Weak<LoopbackConnection>>,
}

/// Test/dev driver for the loopback backend.
#[derive(Clone, Default)]
pub struct LoopbackHandle {
    inner: Arc<LoopbackInner>,
}

impl LoopbackHandle {
    fn connection(&self) -> Option<Arc<LoopbackConnection>> {
        self.inner.connection.lock().unwrap().upgrade()
    }

    fn observers(&self) -> Vec<Arc<dyn RtcObserver>> {
        self.inner.observers.lock().unwrap().clone()
    }

    pub fn user_joined(&self, uid: u32) {
        if let Some(conn) = self.connection() {
            for observer in self.observers() {
                observer.on_user_joined(conn.as_ref(), uid);
            }
        }
    }

    pub fn user_left(&self, uid: u32) {
        if let Some(conn) = self.connection() {
            for observer in self.observers() {
                observer.on_user_left(conn.as_ref(), uid);
            }
        }
    }

    /// Delivers one PCM frame from `uid`. Returns false when the frame was
    /// dropped because nothing subscribed to that uid.
    pub fn push_audio(&self, uid: u32, pcm: &[u8], samples_per_sec: u32) -> bool {
        let deliverable = *self.inner.auto_subscribe_audio.lock().unwrap()
            || self.inner.subscribed.lock().unwrap().contains(&uid);
        if !deliverable {
            return false;
        }
        let channel = self
            .inner
            .channel
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default();
        let frame = PcmFrame {
            buffer: pcm.to_vec(),
            samples_per_sec,
        };
        let observers = self.inner.audio_observers.lock().unwrap().clone();
        for observer in &observers {
            observer.on_playback_audio_frame_before_mixing(&channel, uid, &frame);
        }
        !observers.is_empty()
    }

    pub fn is_subscribed(&self, uid: u32) -> bool {
        self.inner.subscribed.lock().unwrap().contains(&uid)
    }
}

pub struct LoopbackService {
    app_id: String,
    handle: LoopbackHandle,
}

impl LoopbackService {
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            handle: LoopbackHandle::default(),
        }
    }

    pub fn handle(&self) -> LoopbackHandle {
        self.handle.clone()
    }
}

impl RtcService for LoopbackService {
    fn app_id(&self) -> &str {
        &self.app_id
    }

    fn create_connection(&self, config: RtcConnectionConfig) -> Result<Arc<dyn RtcConnection>> {
        let inner = self.handle.inner.clone();
        *inner.auto_subscribe_audio.lock().unwrap() = config.auto_subscribe_audio;
        let connection = Arc::new(LoopbackConnection {
            inner: inner.clone(),
        });
        *inner.connection.lock().unwrap() = Arc::downgrade(&connection);
        Ok(connection)
    }

    fn release(&self) {}
}

pub struct LoopbackConnection {
    inner: Arc<LoopbackInner>,
}

impl RtcConnection for LoopbackConnection {
    fn register_observer(&self, observer: Arc<dyn RtcObserver>) {
        self.inner.observers.lock().unwrap().push(observer);
    }

    fn register_audio_observer(&self, observer: Arc<dyn AudioFrameObserver>) {
        self.inner.audio_observers.lock().unwrap().push(observer);
    }

    fn set_playback_audio_params(&self, _channels: u16, _sample_rate: u32) -> Result<()> {
        Ok(())
    }

    fn subscribe_audio(&self, uid: u32) -> Result<()> {
        debug!(uid, "loopback subscribe");
        self.inner.subscribed.lock().unwrap().insert(uid);
        Ok(())
    }

    fn connect(&self, _token: &str, channel: &str, _uid: u32) -> Result<()> {
        *self.inner.channel.lock().unwrap() = Some(channel.to_string());
        let observers = self.inner.observers.lock().unwrap().clone();
        for observer in observers {
            observer.on_connected(self, channel);
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let channel = self
            .inner
            .channel
            .lock()
            .unwrap()
            .take()
            .unwrap_or_default();
        let observers = self.inner.observers.lock().unwrap().clone();
        for observer in observers {
            observer.on_disconnected(self, &channel);
        }
        self.inner.observers.lock().unwrap().clear();
        self.inner.audio_observers.lock().unwrap().clear();
        self.inner.subscribed.lock().unwrap().clear();
        Ok(())
    }
}
