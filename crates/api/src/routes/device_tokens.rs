//! Device token registration.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::DeviceToken;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/device-tokens", post(register_token))
}

#[derive(Debug, Deserialize)]
pub struct RegisterTokenRequest {
    pub user_id: Uuid,
    pub token: String,
    /// One of `ios`, `android`, `web`.
    pub platform: String,
    #[serde(default)]
    pub device_hint: Option<String>,
}

/// POST /api/device-tokens: Register or reactivate a device token.
async fn register_token(
    State(state): State<AppState>,
    Json(req): Json<RegisterTokenRequest>,
) -> Result<Json<DeviceToken>, AppError> {
    let token = state
        .engine()
        .tokens
        .register(
            req.user_id,
            &req.token,
            &req.platform,
            req.device_hint.as_deref(),
        )
        .await?;
    Ok(Json(token))
}
