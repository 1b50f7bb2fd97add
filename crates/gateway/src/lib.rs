//! HTTP gateway for Dewey.
//!
//! Exposes a health check, the queued query API under `/api/v1`, and a
//! WebSocket chat stream at `/ws`. Built on Axum.

pub mod api_v1;
pub mod ws;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::{middleware, response::Json, routing::get, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use dewey_agent::{AgentLoop, JobQueue, JobWorker};
use dewey_config::AppConfig;
use dewey_core::error::Error;

/// Shared application state for the gateway.
pub struct GatewayState {
    /// Runs interactive WebSocket requests
    pub agent: Arc<AgentLoop>,

    /// Submission/status front of the job store
    pub queue: JobQueue,

    /// Accepted `X-API-Key` values; empty disables the check
    pub api_keys: Vec<String>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the agent loop described by the configuration: built-in tools,
/// the configured provider and reply protocol.
pub fn build_agent(config: &AppConfig) -> Result<AgentLoop, Error> {
    let tools = dewey_tools::default_registry(&config.tools)?;
    let gateway = dewey_providers::build_gateway(config, &tools.manifest_prompt())?;
    Ok(AgentLoop::from_config(config, Arc::new(gateway), Arc::new(tools)))
}

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - `X-API-Key` check on `/api/v1` when keys are configured
/// - CORS
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let v1 = api_v1::v1_router(state.clone()).layer(middleware::from_fn_with_state(
        state.clone(),
        api_v1::api_key_middleware,
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(api_v1::API_KEY_HEADER)])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .nest("/api/v1", v1)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server, and the job worker unless disabled.
///
/// Runs until Ctrl-C.
pub async fn start(config: AppConfig, run_worker: bool) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let agent = Arc::new(build_agent(&config)?);
    let store = dewey_store::open(&config.store).await?;
    let queue = JobQueue::new(store);

    let shutdown = CancellationToken::new();
    let worker_handle = (run_worker && config.worker.enabled).then(|| {
        let worker = JobWorker::new(queue.clone(), agent.clone()).with_poll_interval(
            std::time::Duration::from_millis(config.worker.poll_interval_ms),
        );
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.run(cancel).await {
                error!(error = %e, "Job worker exited");
            }
        })
    });

    let state = Arc::new(GatewayState {
        agent,
        queue,
        api_keys: config.gateway.api_keys.clone(),
    });
    let app = build_router(state);

    info!(addr = %addr, worker = worker_handle.is_some(), "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
