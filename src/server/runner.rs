//! Relay server wiring and execution.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::registry::{DEFAULT_MAX_OCCUPANTS, RoomRegistry};

use super::handler::{health_check, websocket_handler};
use super::heartbeat::HeartbeatConfig;
use super::signal::shutdown_signal;
use super::state::AppState;

/// Environment variable enabling development mode (verbose HTTP tracing).
/// Relay semantics are unchanged.
const ENV_MODE: &str = "RELAY_ENV";

/// Relay process configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host address to bind to (e.g., "127.0.0.1").
    pub host: String,
    /// Port number to bind to.
    pub port: u16,
    /// Directory of static client assets served next to the relay.
    pub static_dir: PathBuf,
    /// Liveness probe schedule.
    pub heartbeat: HeartbeatConfig,
    /// Per-room occupant limit before sharding.
    pub max_occupants: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            static_dir: PathBuf::from("public"),
            heartbeat: HeartbeatConfig::default(),
            max_occupants: DEFAULT_MAX_OCCUPANTS,
        }
    }
}

/// Run the relay server until a shutdown signal arrives.
pub async fn run_server(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = RoomRegistry::with_capacity(config.max_occupants);
    let state = Arc::new(AppState::new(registry).with_heartbeat(config.heartbeat));

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/health", get(health_check))
        .fallback_service(ServeDir::new(&config.static_dir))
        .with_state(state);

    let app = if std::env::var(ENV_MODE).is_ok_and(|mode| mode == "development") {
        tracing::info!("development mode: HTTP tracing enabled");
        app.layer(TraceLayer::new_for_http())
    } else {
        app
    };

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("relay server listening on {}", listener.local_addr()?);
    tracing::info!("Connect to: ws://{}/ws", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}
