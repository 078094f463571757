//! Operator routes: system status, job control and manual triggers.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_engine::achievements::AchievementSweepSummary;
use studybell_engine::health::HealthReport;
use studybell_engine::tokens::DedupSummary;
use studybell_scheduler::operations::EmergencyReport;
use studybell_scheduler::{JobStatus, RunReport};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications/status", get(system_status))
        .route("/api/notifications/jobs", get(job_status))
        .route("/api/notifications/jobs/{name}/run", post(run_job))
        .route(
            "/api/notifications/achievements/check",
            post(trigger_achievement_check),
        )
        .route(
            "/api/notifications/device-tokens/cleanup",
            post(trigger_device_token_cleanup),
        )
        .route("/api/notifications/emergency", post(send_emergency))
}

#[derive(Debug, Default, Deserialize)]
pub struct AchievementCheckRequest {
    /// Users to check. Omitted means the standard sweep batch.
    #[serde(default)]
    pub user_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenCleanupRequest {
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct EmergencyRequest {
    pub title: String,
    pub body: String,
    /// Explicit targets. Omitted means every known user.
    #[serde(default)]
    pub user_ids: Option<Vec<Uuid>>,
}

/// GET /api/notifications/status: Health score and its inputs.
async fn system_status(State(state): State<AppState>) -> Result<Json<HealthReport>, AppError> {
    Ok(Json(state.ops.get_system_status().await?))
}

/// GET /api/notifications/jobs: Every scheduled job with its bookkeeping.
async fn job_status(State(state): State<AppState>) -> Json<Vec<JobStatus>> {
    Json(state.ops.get_job_status())
}

/// POST /api/notifications/jobs/:name/run: Run a job body now.
///
/// A failing body still answers 200; the report carries the error.
async fn run_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RunReport>, AppError> {
    Ok(Json(state.ops.run_job_now(&name).await?))
}

async fn trigger_achievement_check(
    State(state): State<AppState>,
    Json(req): Json<AchievementCheckRequest>,
) -> Result<Json<AchievementSweepSummary>, AppError> {
    Ok(Json(state.ops.trigger_achievement_check(req.user_ids).await?))
}

async fn trigger_device_token_cleanup(
    State(state): State<AppState>,
    Json(req): Json<TokenCleanupRequest>,
) -> Result<Json<DedupSummary>, AppError> {
    Ok(Json(state.ops.trigger_device_token_cleanup(req.user_id).await?))
}

/// POST /api/notifications/emergency: Broadcast an urgent announcement.
async fn send_emergency(
    State(state): State<AppState>,
    Json(req): Json<EmergencyRequest>,
) -> Result<Json<EmergencyReport>, AppError> {
    let report = state
        .ops
        .send_emergency_notification(&req.title, &req.body, req.user_ids)
        .await?;
    Ok(Json(report))
}
