use crate::{
    config::ServerConfig,
    error::{Result, ServerError, SortyxError},
    session::SessionManager,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use super::handlers::{
    bins_status_handler, classify_handler, create_session_handler, delete_session_handler,
    detect_handler, health_handler, reload_models_handler, scan_handler, sensors_handler,
    session_state_handler, stats_handler,
};
use super::stats::ConnectionStats;
use super::ws::ws_handler;

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) connections: Arc<ConnectionStats>,
    pub(crate) jpeg_quality: u8,
    /// Cancelled when the server stops; open sockets close on it
    pub(crate) shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(sessions: Arc<SessionManager>, jpeg_quality: u8) -> Self {
        Self {
            sessions,
            connections: Arc::new(ConnectionStats::default()),
            jpeg_quality,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn connections(&self) -> &ConnectionStats {
        &self.connections
    }
}

/// Build the application router over the given state
pub fn router(state: ServerState, permissive_cors: bool) -> Router {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/scan", post(scan_handler))
        .route("/sessions", post(create_session_handler))
        .route(
            "/sessions/:id",
            get(session_state_handler).delete(delete_session_handler),
        )
        .route("/detect-hand-wrist", post(detect_handler))
        .route("/detect-hand", post(detect_handler))
        .route("/classify", post(classify_handler))
        .route("/models/reload", post(reload_models_handler))
        .route("/stats", get(stats_handler))
        .route("/bins/status", get(bins_status_handler))
        .route("/sensors", post(sensors_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if permissive_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// HTTP and WebSocket front end of the scan pipeline
pub struct ApiServer {
    pub(crate) config: ServerConfig,
    pub(crate) state: ServerState,
}

impl ApiServer {
    pub fn new(
        config: ServerConfig,
        sessions: Arc<SessionManager>,
        jpeg_quality: u8,
        shutdown: CancellationToken,
    ) -> Self {
        let mut state = ServerState::new(sessions, jpeg_quality);
        state.shutdown = shutdown;
        Self { config, state }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn router(&self) -> Router {
        router(self.state.clone(), self.config.permissive_cors)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    /// Serve until the shutdown token is cancelled
    pub async fn start(&self) -> Result<()> {
        let app = self.router();
        let addr = self.address();

        info!("Starting API server on {}", addr);

        let listener =
            tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| ServerError::BindFailed {
                    address: addr.clone(),
                    source: e,
                })?;

        info!("API server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(self.state.shutdown.clone().cancelled_owned())
            .await
            .map_err(|e| ServerError::StartupFailed {
                details: format!("Server error: {}", e),
            })?;

        info!("API server on {} stopped", addr);
        Ok(())
    }
}

/// API server builder for configuration
pub struct ApiServerBuilder {
    config: Option<ServerConfig>,
    sessions: Option<Arc<SessionManager>>,
    jpeg_quality: Option<u8>,
    shutdown: Option<CancellationToken>,
}

impl ApiServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            sessions: None,
            jpeg_quality: None,
            shutdown: None,
        }
    }

    /// Token that stops the server and closes open sockets
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Set the server configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the session manager that owns the scan pipeline
    pub fn sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// JPEG quality used when re-encoding images for `/classify`
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = Some(quality);
        self
    }

    pub fn build(self) -> Result<ApiServer> {
        let config = self.config.ok_or_else(|| {
            SortyxError::Server(ServerError::StartupFailed {
                details: "Server configuration is required".to_string(),
            })
        })?;

        let sessions = self.sessions.ok_or_else(|| {
            SortyxError::Server(ServerError::StartupFailed {
                details: "Session manager is required".to_string(),
            })
        })?;

        Ok(ApiServer::new(
            config,
            sessions,
            self.jpeg_quality.unwrap_or(90),
            self.shutdown.unwrap_or_default(),
        ))
    }
}

impl Default for ApiServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
