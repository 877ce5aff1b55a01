//! REST API server module
//!
//! Exposes run control, history and watcher state over HTTP under `/api/v1`,
//! plus a server-sent event stream of archiver events.

use crate::config::ApiConfig;
use crate::{Archiver, Result};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error_response;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Runs
/// - `GET /status` - Live (or last finished) run
/// - `POST /runs` - Start a manual or single-URL run (202, or 409 while a run is active)
/// - `POST /runs/cancel` - Cancel the active run
/// - `GET /runs` - Recent run summaries
///
/// ## History
/// - `GET /history` - Item history (pagination, source/date/result filters)
///
/// ## Triggers
/// - `GET /watcher` - Watcher status and per-source watch state
/// - `GET /schedule` - Interval schedule with last/next run
/// - `PUT /schedule` - Change the interval schedule
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /events` - Server-sent events stream
pub fn create_router(archiver: Archiver, api: &ApiConfig) -> Router {
    let state = AppState::new(archiver);

    let routes = Router::new()
        // Runs
        .route("/status", get(routes::get_status))
        .route("/runs", post(routes::start_run))
        .route("/runs", get(routes::list_runs))
        .route("/runs/cancel", post(routes::cancel_run))
        // History
        .route("/history", get(routes::get_history))
        // Triggers
        .route("/watcher", get(routes::get_watcher))
        .route("/schedule", get(routes::get_schedule))
        .route("/schedule", put(routes::update_schedule))
        // System
        .route("/health", get(routes::health_check))
        .route("/events", get(routes::event_stream))
        .with_state(state);

    let routes = if api.api_key.is_some() {
        routes.layer(middleware::from_fn_with_state(
            api.api_key.clone(),
            auth::require_api_key,
        ))
    } else {
        routes
    };

    let router = Router::new()
        .nest("/api/v1", routes)
        .layer(TraceLayer::new_for_http());

    if api.cors_enabled {
        router.layer(build_cors_layer(&api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` (or an empty list) allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Serve the API on `api.bind_address` until the archiver shuts down
///
/// # Errors
///
/// Returns [`Error::Io`](crate::Error::Io) when the address cannot be bound
/// and [`Error::ApiServerError`](crate::Error::ApiServerError) when serving
/// fails.
pub async fn start_api_server(archiver: Archiver, api: ApiConfig) -> Result<()> {
    let bind_address = api.bind_address;
    tracing::info!(address = %bind_address, "Starting API server");

    let shutdown = archiver.services.shutdown.clone();
    let app = create_router(archiver, &api);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %listener.local_addr().unwrap_or(bind_address),
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
