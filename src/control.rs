//! Control surface: the Start/Stop/List operations the HTTP layer calls
//! into. Owns the dedup registry, the translator client, the token
//! minter, and the session manager.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::manager::{SessionLaunch, SessionManager};
use crate::palabra::{PalabraClient, SpeechRecognition, TranslationRequest, TranslationSpec};
use crate::registry::{
    StreamInfo, TaskInfo, TaskRegistry, BOT_UID_BASE, TASK_UID, TRANSLATOR_UID_BASE,
};
use crate::token::{Role, TokenMinter};

const TOKEN_EXPIRY: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no task found for {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub channel: String,
    pub speaker_uid: String,
    pub source_language: String,
    pub target_languages: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StartResponse {
    pub task_id: String,
    pub streams: Vec<StreamInfo>,
}

pub struct ControlSurface {
    config: Arc<Config>,
    registry: TaskRegistry,
    palabra: PalabraClient,
    manager: SessionManager,
    minter: Arc<dyn TokenMinter>,
    /// Serializes Start calls so one dedup key can never produce two
    /// external translator calls.
    start_lock: Mutex<()>,
}

impl ControlSurface {
    pub fn new(
        config: Arc<Config>,
        palabra: PalabraClient,
        manager: SessionManager,
        minter: Arc<dyn TokenMinter>,
    ) -> Self {
        Self {
            config,
            registry: TaskRegistry::new(),
            palabra,
            manager,
            minter,
            start_lock: Mutex::new(()),
        }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Starts (or reuses) a translation task. In avatar mode the returned
    /// streams carry the avatar uids, so clients subscribe to the rendered
    /// video identity rather than the bare translator audio.
    pub async fn start(&self, request: StartRequest) -> Result<StartResponse, ControlError> {
        if request.channel.is_empty()
            || request.speaker_uid.is_empty()
            || request.source_language.is_empty()
            || request.target_languages.is_empty()
        {
            return Err(ControlError::Other(anyhow::anyhow!(
                "missing required fields: channel, speaker_uid, source_language, target_languages"
            )));
        }

        let _guard = self.start_lock.lock().await;

        let primary_key = TaskRegistry::key(
            &request.channel,
            &request.speaker_uid,
            &request.target_languages[0],
        );
        if let Some(existing) = self.registry.get(&primary_key).await {
            info!(
                key = %primary_key,
                task_id = %existing.task_id,
                "reusing existing translation task"
            );
            return Ok(StartResponse {
                task_id: existing.task_id,
                streams: existing.streams,
            });
        }
        info!(key = %primary_key, "no existing task, creating translation");

        let task_token = self
            .minter
            .mint(&request.channel, TASK_UID, Role::Publisher, TOKEN_EXPIRY)
            .await
            .context("failed to mint task token")?;

        let mut translations = Vec::with_capacity(request.target_languages.len());
        let mut translator_streams = Vec::with_capacity(request.target_languages.len());
        for (index, language) in request.target_languages.iter().enumerate() {
            let uid = TRANSLATOR_UID_BASE + index as u32;
            let token = self
                .minter
                .mint(&request.channel, uid, Role::Publisher, TOKEN_EXPIRY)
                .await
                .with_context(|| format!("failed to mint translator token for uid {uid}"))?;
            translations.push(TranslationSpec {
                local_uid: uid.to_string(),
                token,
                target_language: language.clone(),
                options: json!({}),
            });
            translator_streams.push(StreamInfo {
                uid: uid.to_string(),
                language: language.clone(),
            });
        }

        let task_id = self
            .palabra
            .start_translation(&TranslationRequest {
                agora_app_id: self.config.app_id.clone(),
                channel: request.channel.clone(),
                remote_uid: request.speaker_uid.clone(),
                local_uid: TASK_UID.to_string(),
                token: task_token,
                speech_recognition: SpeechRecognition {
                    source_language: request.source_language.clone(),
                    options: json!({}),
                },
                translations,
            })
            .await?;

        let streams = if self.config.avatar_mode {
            match self.spawn_avatar_sessions(&request, &task_id).await {
                Ok(streams) => streams,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "avatar spawn failed, rolling back");
                    for session_id in self
                        .manager
                        .session_ids_with_prefix(&format!("{task_id}-"))
                        .await
                    {
                        let _ = self.manager.stop_session(&session_id).await;
                    }
                    if let Err(e) = self.palabra.stop_translation(&task_id).await {
                        warn!(task_id = %task_id, error = %e, "rollback delete failed");
                    }
                    return Err(ControlError::Other(e));
                }
            }
        } else {
            translator_streams
        };

        let created_at = chrono::Utc::now();
        for language in &request.target_languages {
            let key = TaskRegistry::key(&request.channel, &request.speaker_uid, language);
            self.registry
                .insert(
                    key,
                    TaskInfo {
                        task_id: task_id.clone(),
                        channel: request.channel.clone(),
                        speaker_uid: request.speaker_uid.clone(),
                        target_language: language.clone(),
                        streams: streams.clone(),
                        created_at,
                    },
                )
                .await;
        }
        info!(task_id = %task_id, streams = streams.len(), "translation task registered");

        Ok(StartResponse { task_id, streams })
    }

    /// One child per target: the bot subscribes to translator `3000+i`
    /// and the avatar publishes under a fresh per-channel uid.
    async fn spawn_avatar_sessions(
        &self,
        request: &StartRequest,
        task_id: &str,
    ) -> Result<Vec<StreamInfo>> {
        let mut streams = Vec::with_capacity(request.target_languages.len());
        for (index, language) in request.target_languages.iter().enumerate() {
            let avatar_uid = self.registry.allocate_avatar_uid(&request.channel).await;
            let bot_uid = BOT_UID_BASE + index as u32;
            let palabra_uid = TRANSLATOR_UID_BASE + index as u32;

            let bot_token = self
                .minter
                .mint(&request.channel, bot_uid, Role::Subscriber, TOKEN_EXPIRY)
                .await
                .context("failed to mint bot token")?;
            let anam_token = self
                .minter
                .mint(&request.channel, avatar_uid, Role::Publisher, TOKEN_EXPIRY)
                .await
                .context("failed to mint avatar token")?;

            let session_id = format!("{task_id}-{index}");
            self.manager
                .start_session(SessionLaunch {
                    task_id: session_id.clone(),
                    app_id: self.config.app_id.clone(),
                    channel: request.channel.clone(),
                    bot_uid,
                    bot_token,
                    palabra_uid,
                    anam_api_key: self.config.anam_api_key.clone(),
                    anam_base_url: self.config.anam_base_url.clone(),
                    anam_avatar_id: self.config.anam_avatar_id.clone(),
                    anam_uid: avatar_uid,
                    anam_token,
                    target_language: language.clone(),
                })
                .await
                .map_err(anyhow::Error::new)
                .with_context(|| format!("failed to start avatar session {session_id}"))?;

            streams.push(StreamInfo {
                uid: avatar_uid.to_string(),
                language: language.clone(),
            });
        }
        Ok(streams)
    }

    /// Stops a task everywhere: translator, children, registry. A failed
    /// translator delete is logged and teardown continues — leaking a
    /// translator task is recoverable, a half-stopped session is not.
    pub async fn stop(&self, task_id: &str) -> Result<(), ControlError> {
        info!(task_id, "stopping translation task");

        if let Err(e) = self.palabra.stop_translation(task_id).await {
            warn!(task_id, error = %e, "translator delete failed, continuing teardown");
        }

        let mut stopped = 0usize;
        for session_id in self
            .manager
            .session_ids_with_prefix(&format!("{task_id}-"))
            .await
        {
            match self.manager.stop_session(&session_id).await {
                Ok(()) => stopped += 1,
                Err(e) => warn!(session_id = %session_id, error = %e, "session stop failed"),
            }
        }

        let removed = self.registry.remove_task(task_id).await;
        if removed == 0 && stopped == 0 {
            return Err(ControlError::NotFound(task_id.to_string()));
        }
        info!(task_id, removed, stopped, "translation task stopped");
        Ok(())
    }

    pub async fn list(&self) -> Vec<TaskInfo> {
        self.registry.snapshot().await
    }

    pub async fn tasks_for_channel(&self, channel: &str) -> Vec<TaskInfo> {
        self.registry.tasks_for_channel(channel).await
    }

    /// Drains every live session; called on server shutdown.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

impl std::fmt::Debug for ControlSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSurface").finish_non_exhaustive()
    }
}
