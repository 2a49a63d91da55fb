//! JSON session API under `/api/sessions`.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use collab_session::SessionInfo;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    repo: Option<Value>,
}

/// `POST /api/sessions`. The body is parsed by hand so a missing or
/// malformed body is reported the same way as a missing `repo`.
pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SessionInfo>, ApiError> {
    if !state.admission.allow_create() {
        return Err(ApiError::RateLimited(format!(
            "Rate limited. Max {} sessions per minute.",
            state.admission.create_limit()
        )));
    }

    let request: CreateSessionRequest = serde_json::from_slice(&body).unwrap_or_default();
    let repo = request
        .repo
        .as_ref()
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::BadRequest("repo URL is required".into()))?;

    let info = state
        .registry
        .create(repo)
        .await
        .map_err(ApiError::from_create)?;
    Ok(Json(info))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list().await)
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    state.registry.get(&id).await.map(Json).ok_or(ApiError::NotFound)
}

pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.registry.end(&id).await {
        Ok(Json(json!({ "ok": true })))
    } else {
        Err(ApiError::NotFound)
    }
}

pub async fn restart_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let handle = state
        .registry
        .get_internal(&id)
        .await
        .ok_or(ApiError::NotFound)?;
    if !handle.is_active() {
        return Err(ApiError::Conflict("Session has ended".into()));
    }
    state.registry.restart(&id).await?;
    Ok(Json(json!({ "ok": true })))
}
