//! Delivery receipts and read acknowledgements.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use uuid::Uuid;

use studybell_common::error::AppError;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications/{id}/delivered", post(mark_delivered))
        .route("/api/notifications/{id}/read", post(acknowledge_read))
}

/// POST /api/notifications/:id/delivered: `updated` is false if the status did not move.
async fn mark_delivered(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state.engine().dispatch.mark_delivered(id).await?;
    Ok(Json(json!({ "id": id, "updated": updated })))
}

async fn acknowledge_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state.engine().dispatch.acknowledge_read(id).await?;
    Ok(Json(json!({ "id": id, "updated": updated })))
}
