use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::http_server::{error::Report, state::AppState};
use crate::services::tasks::{StartOutcome, StopOutcome, TaskKind};

pub async fn task_status(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Report> {
    let kind: TaskKind = name.parse()?;
    let view = app_state.task_runner.status().view(kind.name()).await?;
    Ok(Json(view))
}

/// Starts the task with the configured defaults. Returns immediately.
#[tracing::instrument(skip(app_state))]
pub async fn start_task(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Report> {
    let kind: TaskKind = name.parse()?;
    let runner = &app_state.task_runner;
    let response = match runner.start(runner.default_request(kind)).await? {
        StartOutcome::Started => (StatusCode::ACCEPTED, Json(json!({ "started": true }))),
        StartOutcome::AlreadyRunning => (
            StatusCode::CONFLICT,
            Json(json!({ "started": false, "reason": "already running" })),
        ),
    };
    Ok(response)
}

#[tracing::instrument(skip(app_state))]
pub async fn stop_task(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Report> {
    let kind: TaskKind = name.parse()?;
    let stopping = match app_state.task_runner.stop(kind).await? {
        StopOutcome::Stopping => true,
        StopOutcome::NotRunning => false,
    };
    Ok(Json(json!({ "stopping": stopping })))
}
