//! REST API and WebSocket server for the monitoring hub
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Shared components** (stats cache, trigger, broadcaster) in [`ApiState`]
//! - **WebSocket** connections registered in the room registry
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/connectivity/statistics` - Cached fleet statistics
//! - `POST /api/v1/connectivity/batch-check` - Check selected devices
//! - `POST /api/v1/connectivity/refresh-cache` - Recompute the statistics
//! - `POST /api/v1/connectivity/clear-cache` - Drop the cached statistics
//! - `POST /api/v1/connectivity/check-ip` - Check an arbitrary address
//! - `POST /api/v1/jobs/monitor/trigger` - Manual monitoring run
//! - `GET /api/v1/jobs/{id}` - Job status
//! - `GET /api/v1/realtime/stats` - Connection and room counts
//! - `WS /api/v1/ws` - Live dashboard stream

pub mod error;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::{Ipv4Addr, SocketAddr};

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for dashboard
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, crate::util::get_default_port())),
            enable_cors: true,
        }
    }
}

impl ApiConfig {
    /// Settings from the config file, falling back to `HUB_ADDR`/`HUB_PORT`
    pub fn from_config(config: &Config) -> Self {
        match &config.api {
            Some(section) => Self {
                bind_addr: section.bind.unwrap_or_else(crate::util::get_bind_addr),
                enable_cors: section.enable_cors,
            },
            None => Self {
                bind_addr: crate::util::get_bind_addr(),
                ..Self::default()
            },
        }
    }
}

/// Build the router with every route and layer
pub fn router(state: ApiState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route(
            "/api/v1/connectivity/statistics",
            get(routes::connectivity::get_statistics),
        )
        .route(
            "/api/v1/connectivity/batch-check",
            post(routes::connectivity::batch_check),
        )
        .route(
            "/api/v1/connectivity/refresh-cache",
            post(routes::connectivity::refresh_cache),
        )
        .route(
            "/api/v1/connectivity/clear-cache",
            post(routes::connectivity::clear_cache),
        )
        .route(
            "/api/v1/connectivity/check-ip",
            post(routes::connectivity::check_ip),
        )
        .route(
            "/api/v1/jobs/monitor/trigger",
            post(routes::jobs::trigger_monitor),
        )
        .route("/api/v1/jobs/:id", get(routes::jobs::get_job))
        .route(
            "/api/v1/realtime/stats",
            get(routes::realtime::get_realtime_stats),
        )
        .route("/api/v1/ws", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(state, config.enable_cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
