//! Deduplication registry and conference identity allocation.
//!
//! Multiple viewers requesting the same (channel, speaker, target) share
//! one translator task, so registry entries are keyed by that triple. Uid
//! ranges keep bot tiles out of the frontend's participant grid: human
//! participants are minted outside [3000, 6000), translators get
//! 3000-3999 from the translator API, avatars 4000+, bots 4500+.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Uid the translator task itself joins with.
pub const TASK_UID: u32 = 200;
/// First uid handed to translator streams within a request.
pub const TRANSLATOR_UID_BASE: u32 = 3000;
/// First avatar uid per channel.
pub const AVATAR_UID_BASE: u32 = 4000;
/// First bot uid within a request.
pub const BOT_UID_BASE: u32 = 4500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamInfo {
    pub uid: String,
    pub language: String,
}

/// One live translation task as seen by clients.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub channel: String,
    pub speaker_uid: String,
    pub target_language: String,
    /// The streams clients should subscribe to (avatar uids in avatar
    /// mode, translator uids otherwise).
    pub streams: Vec<StreamInfo>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    tasks: HashMap<String, TaskInfo>,
    next_avatar_uid: HashMap<String, u32>,
}

/// Process-wide task registry. One locked structure holds both the dedup
/// map and the per-channel avatar uid counters.
#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dedup key for one (channel, speaker, target-language) triple.
    pub fn key(channel: &str, speaker_uid: &str, target_language: &str) -> String {
        format!("{channel}:{speaker_uid}:{target_language}")
    }

    pub async fn get(&self, key: &str) -> Option<TaskInfo> {
        self.inner.lock().await.tasks.get(key).cloned()
    }

    pub async fn insert(&self, key: String, info: TaskInfo) {
        self.inner.lock().await.tasks.insert(key, info);
    }

    /// Removes every entry belonging to `task_id`. Returns how many keys
    /// were swept.
    pub async fn remove_task(&self, task_id: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let keys: Vec<String> = inner
            .tasks
            .iter()
            .filter(|(_, info)| info.task_id == task_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            inner.tasks.remove(key);
        }
        keys.len()
    }

    pub async fn snapshot(&self) -> Vec<TaskInfo> {
        self.inner.lock().await.tasks.values().cloned().collect()
    }

    pub async fn tasks_for_channel(&self, channel: &str) -> Vec<TaskInfo> {
        self.inner
            .lock()
            .await
            .tasks
            .values()
            .filter(|info| info.channel == channel)
            .cloned()
            .collect()
    }

    /// Hands out the next avatar uid for a channel; one per translation
    /// target, monotone from 4000.
    pub async fn allocate_avatar_uid(&self, channel: &str) -> u32 {
        let mut inner = self.inner.lock().await;
        let next = inner
            .next_avatar_uid
            .entry(channel.to_string())
            .or_insert(AVATAR_UID_BASE);
        let uid = *next;
        *next += 1;
        uid
    }
}
