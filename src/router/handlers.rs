//! Session lifecycle, environment catalogue, and health endpoints.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::session::{extract_info, extract_reward, Session};

use super::AppState;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub env_id: String,
    pub observation: String,
    pub info: Map<String, Value>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl SessionResponse {
    fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            env_id: session.env_id.clone(),
            observation: session.observation.read().clone(),
            info: session.info.read().clone(),
            status: session.status.read().as_str().to_string(),
            created_at: session.created_at,
            last_active_at: *session.last_active_at.read(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub session_id: String,
    pub observation: String,
    pub reward: f64,
    pub done: bool,
    pub info: Map<String, Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub env_id: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct StepRequest {
    pub action: String,
}

pub async fn banner(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "title": state.config.title, "version": state.config.version }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_sessions": state.manager.active_session_count(),
        "max_sessions": state.config.max_sessions,
        "available_environments": state.config.env_files.len(),
    }))
}

pub async fn list_environments(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "environments": state.config.env_files,
        "total": state.config.env_files.len(),
    }))
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>> {
    let init_payload = (state.hooks.on_create_session)(request.env_id, request.params).await;

    let session = state.manager.create_session(init_payload).await?;
    Ok(Json(SessionResponse::from_session(&session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>> {
    let session = state.manager.get_session(&session_id)?;
    Ok(Json(SessionResponse::from_session(&session)))
}

pub async fn step_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<StepRequest>,
) -> Result<Json<StepResponse>> {
    let session = state.manager.get_session(&session_id)?;
    let response = state.batch.submit_step(session.clone(), body.action).await?;

    Ok(Json(StepResponse {
        session_id: session.session_id.clone(),
        observation: response.get("observation").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        reward: extract_reward(&response),
        done: response.get("done").and_then(|v| v.as_bool()).unwrap_or(false),
        info: extract_info(&response),
    }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>> {
    state.manager.delete_session(&session_id).await?;
    Ok(Json(json!({ "status": "ok", "session_id": session_id })))
}

pub async fn delete_all_sessions(State(state): State<AppState>) -> Json<Value> {
    let deleted = state.manager.delete_all_sessions().await;
    Json(json!({ "status": "ok", "count": deleted.len(), "deleted": deleted }))
}
