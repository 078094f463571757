//! Shared application state for the Axum API server.

use studybell_engine::Engine;
use studybell_scheduler::Operations;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub ops: Operations,
}

impl AppState {
    pub fn new(ops: Operations) -> Self {
        Self { ops }
    }

    pub fn engine(&self) -> &Engine {
        self.ops.engine()
    }
}
