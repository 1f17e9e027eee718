use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::state::AppState;
use crate::control::{ControlError, StartRequest};
use crate::manager::SessionInfo;
use crate::registry::{StreamInfo, TaskInfo};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTranslationRequest {
    pub channel: String,
    pub source_uid: String,
    pub source_language: String,
    pub target_languages: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTranslationResponse {
    pub success: bool,
    pub task_id: String,
    pub streams: Vec<StreamInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTranslationRequest {
    pub task_id: String,
}

#[derive(Debug, Serialize)]
pub struct StopTranslationResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub channel: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListTranslationsResponse {
    pub tasks: Vec<TaskInfo>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /palabra/translations/start
pub async fn start_translation(
    State(state): State<AppState>,
    Json(req): Json<StartTranslationRequest>,
) -> impl IntoResponse {
    info!(channel = %req.channel, speaker = %req.source_uid, "start translation request");

    let request = StartRequest {
        channel: req.channel,
        speaker_uid: req.source_uid,
        source_language: req.source_language,
        target_languages: req.target_languages,
    };

    match state.control.start(request).await {
        Ok(response) => (
            StatusCode::OK,
            Json(StartTranslationResponse {
                success: true,
                task_id: response.task_id,
                streams: response.streams,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to start translation");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("failed to start translation: {e}"),
                }),
            )
                .into_response()
        }
    }
}

/// POST /palabra/translations/stop
pub async fn stop_translation(
    State(state): State<AppState>,
    Json(req): Json<StopTranslationRequest>,
) -> impl IntoResponse {
    info!(task_id = %req.task_id, "stop translation request");

    match state.control.stop(&req.task_id).await {
        Ok(()) => (StatusCode::OK, Json(StopTranslationResponse { success: true })).into_response(),
        Err(ControlError::NotFound(task_id)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("task {task_id} not found"),
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to stop translation");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("failed to stop translation: {e}"),
                }),
            )
                .into_response()
        }
    }
}

/// GET /palabra/translations[?channel=...]
pub async fn list_translations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let tasks = match query.channel {
        Some(channel) => state.control.tasks_for_channel(&channel).await,
        None => state.control.list().await,
    };
    (StatusCode::OK, Json(ListTranslationsResponse { tasks })).into_response()
}

/// GET /palabra/sessions — live child sessions, for UX polling.
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let mut sessions: Vec<SessionInfo> = Vec::new();
    for handle in state.control.manager().all_sessions().await {
        sessions.push(handle.info().await);
    }
    (StatusCode::OK, Json(sessions)).into_response()
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
