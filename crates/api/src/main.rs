//! Studybell API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use studybell_common::config::AppConfig;
use studybell_common::db::{create_pool, migrate};
use studybell_engine::postgres::PgStore;
use studybell_engine::{Engine, EngineSettings, Stores};
use studybell_notifier::channel_set_from_config;
use studybell_scheduler::tasks::{SchedulerSettings, register_standard_jobs};
use studybell_scheduler::{JobRegistry, Operations};

use studybell_api::routes::create_router;
use studybell_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(concat!(
                "studybell_api=info,studybell_engine=info,studybell_scheduler=info,",
                "studybell_notifier=info,tower_http=info",
            ))
        }))
        .init();

    tracing::info!("Starting Studybell notification service...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    migrate(&pool).await?;

    let channels = channel_set_from_config(&config)?;
    let engine = Engine::new(
        Stores::shared(Arc::new(PgStore::new(pool))),
        channels.set,
        EngineSettings::from(&config),
    );

    // Scheduled jobs
    let registry = JobRegistry::new();
    register_standard_jobs(&registry, &engine, &SchedulerSettings::from(&config))?;
    registry.start_all();
    tracing::info!(jobs = registry.status().len(), "Scheduler started");

    let state = AppState::new(Operations::new(engine, registry.clone()));

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown();
    tracing::info!("Studybell notification service stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
