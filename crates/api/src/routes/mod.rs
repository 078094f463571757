pub mod device_tokens;
pub mod health;
pub mod notifications;
pub mod operations;
pub mod preferences;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(operations::router())
        .merge(notifications::router())
        .merge(device_tokens::router())
        .merge(preferences::router())
        .with_state(state)
}
