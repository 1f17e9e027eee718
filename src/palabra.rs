//! Client for the external Palabra translation API.
//!
//! One task per (channel, speaker) pair; the task joins the conference
//! under `local_uid` and publishes each translation under its own uid.
//! Every uid needs its own token — the API rejects duplicates.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct TranslationSpec {
    pub local_uid: String,
    pub token: String,
    pub target_language: String,
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechRecognition {
    pub source_language: String,
    pub options: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub agora_app_id: String,
    pub channel: String,
    #[serde(rename = "remote_uid")]
    pub remote_uid: String,
    #[serde(rename = "local_uid")]
    pub local_uid: String,
    pub token: String,
    #[serde(rename = "speech_recognition")]
    pub speech_recognition: SpeechRecognition,
    pub translations: Vec<TranslationSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default)]
    pub data: ResponseData,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseData {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error: String,
}

#[derive(Clone)]
pub struct PalabraClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl PalabraClient {
    pub fn new(
        base_url: String,
        client_id: String,
        client_secret: String,
        insecure_tls: bool,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .context("failed to build palabra http client")?;
        Ok(Self {
            http,
            base_url,
            client_id,
            client_secret,
        })
    }

    /// Starts a translation task. Returns the task id assigned by the API.
    pub async fn start_translation(&self, request: &TranslationRequest) -> Result<String> {
        let url = format!("{}/agora/translations", self.base_url);
        info!(channel = %request.channel, speaker = %request.remote_uid, "calling Palabra API");

        let response = self
            .http
            .post(&url)
            .header("ClientID", &self.client_id)
            .header("ClientSecret", &self.client_secret)
            .json(request)
            .send()
            .await
            .context("failed to call Palabra API")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read Palabra API response")?;
        if !status.is_success() {
            bail!("Palabra API error: {status} - {body}");
        }

        let parsed: ApiResponse =
            serde_json::from_str(&body).context("failed to parse Palabra API response")?;
        if !parsed.ok {
            let error = if parsed.data.error.is_empty() {
                "unknown error".to_string()
            } else {
                parsed.data.error
            };
            bail!("Palabra API error: {error}");
        }

        info!(task_id = %parsed.data.task_id, status = %parsed.data.status, "translation task started");
        Ok(parsed.data.task_id)
    }

    /// Deletes a translation task. 200 and 204 both count as success.
    pub async fn stop_translation(&self, task_id: &str) -> Result<()> {
        let url = format!("{}/agora/translations/{}", self.base_url, task_id);
        info!(task_id, "stopping translation task");

        let response = self
            .http
            .delete(&url)
            .header("ClientID", &self.client_id)
            .header("ClientSecret", &self.client_secret)
            .send()
            .await
            .context("failed to call Palabra API")?;

        let status = response.status();
        if !matches!(status.as_u16(), 200 | 204) {
            let body = response.text().await.unwrap_or_default();
            warn!(task_id, %status, "Palabra delete returned error");
            bail!("Palabra API error: {status} - {body}");
        }
        Ok(())
    }
}
