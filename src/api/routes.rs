use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::server::AppState;
use crate::registry::lifecycle::{KillError, LabeledPort, RenewError, StartError};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// One dashboard row. Timestamps are unix epoch seconds; the view layer
/// does its own formatting.
#[derive(Serialize)]
pub struct ContainerSummary {
    container_id: String,
    challenge_id: i64,
    image: String,
    owner: String,
    ports: Vec<LabeledPort>,
    created: i64,
    expires: i64,
    state: String,
    is_running: bool,
}

/// List all tracked containers, ordered by creation time.
pub async fn list_containers(State(state): State<Arc<AppState>>) -> Json<Vec<ContainerSummary>> {
    let entries = state.lifecycle.list_for_dashboard(Utc::now()).await;

    Json(
        entries
            .into_iter()
            .map(|e| ContainerSummary {
                container_id: e.record.container_id.clone(),
                challenge_id: e.record.challenge_id,
                image: e.record.image.clone(),
                owner: e.record.owner.to_string(),
                ports: e.ports,
                created: e.record.created_at.timestamp(),
                expires: e.record.expires_at.timestamp(),
                state: format!("{:?}", e.record.state).to_lowercase(),
                is_running: e.is_running,
            })
            .collect(),
    )
}

#[derive(Deserialize)]
pub struct StartRequest {
    pub challenge_id: i64,
    pub user_id: i64,
    pub team_id: Option<i64>,
}

#[derive(Serialize)]
pub struct StartResponse {
    status: String,
    container_id: String,
    ports: Vec<LabeledPort>,
    expires: i64,
}

/// Start (or reuse) an instance for a challenge.
pub async fn start_container(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, AppError> {
    let outcome = state
        .lifecycle
        .start(request.challenge_id, request.user_id, request.team_id)
        .await?;

    let status = if outcome.reused() {
        "already_running"
    } else {
        "created"
    };
    let record = outcome.record();
    let ports = state.lifecycle.annotate_ports(record);

    Ok(Json(StartResponse {
        status: status.to_string(),
        container_id: record.container_id.clone(),
        ports,
        expires: record.expires_at.timestamp(),
    }))
}

#[derive(Serialize)]
pub struct RenewResponse {
    container_id: String,
    expires: i64,
}

/// Extend an instance's deadline by the challenge lifetime.
pub async fn renew_container(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<RenewResponse>, AppError> {
    let record = state
        .lifecycle
        .renew(request.challenge_id, request.user_id, request.team_id)
        .await?;

    Ok(Json(RenewResponse {
        container_id: record.container_id,
        expires: record.expires_at.timestamp(),
    }))
}

#[derive(Serialize)]
pub struct KillResponse {
    success: String,
}

/// Kill a container (the dashboard's kill action).
pub async fn kill_container(
    State(state): State<Arc<AppState>>,
    Path(container_id): Path<String>,
) -> Result<Json<KillResponse>, AppError> {
    state.lifecycle.kill(&container_id, "dashboard").await?;

    Ok(Json(KillResponse {
        success: "Container killed".to_string(),
    }))
}

/// Application error type
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Timeout(String),
    Internal(String),
}

impl From<StartError> for AppError {
    fn from(err: StartError) -> Self {
        match err {
            StartError::UnknownChallenge(_) => AppError::NotFound(err.to_string()),
            StartError::TeamRequired => AppError::BadRequest(err.to_string()),
            StartError::RuntimeTimeout => AppError::Timeout(err.to_string()),
            StartError::RuntimeStart(_)
            | StartError::IncompleteAssignment(_)
            | StartError::PredecessorNotStopped(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<KillError> for AppError {
    fn from(err: KillError) -> Self {
        match err {
            KillError::NotFound(_) => AppError::NotFound(err.to_string()),
            KillError::RuntimeTimeout => AppError::Timeout(err.to_string()),
            KillError::RuntimeStop(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<RenewError> for AppError {
    fn from(err: RenewError) -> Self {
        match err {
            RenewError::NotFound | RenewError::UnknownChallenge(_) => {
                AppError::NotFound(err.to_string())
            }
            RenewError::TeamRequired => AppError::BadRequest(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
