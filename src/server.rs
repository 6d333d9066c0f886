//! # Server Configuration
//!
//! Server setup and routing for the orderbridge service.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers;
use crate::scheduler::SyncScheduler;
use crate::sync::{SyncEngine, SyncGate};
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<SyncEngine>,
    pub gate: Arc<SyncGate>,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(
            "/sync",
            get(handlers::sync::trigger_sync).post(handlers::sync::trigger_sync),
        )
        .route("/orders", post(handlers::orders::push_order))
        .layer(axum::middleware::from_fn(
            telemetry::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(SyncEngine::from_config(&config)?);
    let gate = Arc::new(SyncGate::new());
    let config = Arc::new(config);

    if config.cron_secret.is_none() {
        warn!("no cron secret configured; the /sync trigger is unauthenticated");
    }

    let state = AppState {
        config: Arc::clone(&config),
        engine: Arc::clone(&engine),
        gate: Arc::clone(&gate),
    };
    let app = create_app(state);

    // Resolve the configured bind address
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "server listening");

    let shutdown = CancellationToken::new();
    if config.scheduler.enabled {
        let scheduler = SyncScheduler::new(config.scheduler.clone(), engine, gate);
        tokio::spawn(scheduler.run(shutdown.clone()));
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to listen for shutdown signal");
    }
    token.cancel();
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::sync::trigger_sync,
        crate::handlers::orders::push_order,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::sync::SyncStartedResponse,
            crate::handlers::sync::SyncCompletedResponse,
            crate::handlers::orders::PushResponse,
            crate::sync::PassSummary,
            crate::error::ApiError,
        )
    ),
    info(
        title = "Orderbridge API",
        description = "Trendyol to Airtable order sync service",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
