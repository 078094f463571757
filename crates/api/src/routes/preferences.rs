//! Per-user, per-type notification preferences.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::{NotificationType, PreferenceUpdate, UserNotificationPreference};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/notifications/preferences/{user_id}/{notification_type}",
        get(get_preference).put(update_preference),
    )
}

/// GET: The stored preference, or the defaults when none is stored.
async fn get_preference(
    State(state): State<AppState>,
    Path((user_id, notification_type)): Path<(Uuid, String)>,
) -> Result<Json<UserNotificationPreference>, AppError> {
    let notification_type: NotificationType = notification_type.parse()?;
    let preference = state
        .engine()
        .preferences
        .resolve(user_id, notification_type)
        .await?;
    Ok(Json(preference))
}

/// PUT: Apply a partial update.
async fn update_preference(
    State(state): State<AppState>,
    Path((user_id, notification_type)): Path<(Uuid, String)>,
    Json(update): Json<PreferenceUpdate>,
) -> Result<Json<UserNotificationPreference>, AppError> {
    let notification_type: NotificationType = notification_type.parse()?;
    let preference = state
        .engine()
        .preferences
        .update(user_id, notification_type, &update)
        .await?;
    Ok(Json(preference))
}
