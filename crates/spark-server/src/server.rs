use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use spark_core::{AuthError, CompletionProvider, CredentialVerifier, OwnershipCheck, TurnStore, UserId};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::bridge::StreamingBridge;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::health::health_check;
use crate::hub::Hub;
use crate::pumps::serve_connection;
use crate::router::{ChatRouter, MessageRouter};
use crate::shutdown::ShutdownCoordinator;

pub const ERR_TOKEN_REQUIRED: &str = "Token required";
pub const ERR_TOKEN_INVALID: &str = "Invalid token";

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub router: Arc<dyn MessageRouter>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub config: Arc<ServerConfig>,
    pub provider_name: Arc<str>,
    pub start_time: Instant,
}

/// External collaborators the hub is wired to.
pub struct ServerDeps {
    pub verifier: Arc<dyn CredentialVerifier>,
    pub provider: Arc<dyn CompletionProvider>,
    pub ownership: Arc<dyn OwnershipCheck>,
    pub turns: Arc<dyn TurnStore>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and start serving. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, deps: ServerDeps) -> Result<ServerHandle, std::io::Error> {
    let (hub, registry) = Hub::spawn();

    let provider_name: Arc<str> = Arc::from(deps.provider.name());
    let bridge = Arc::new(StreamingBridge::new(deps.provider, deps.turns, &config.bridge));
    let router: Arc<dyn MessageRouter> = Arc::new(ChatRouter::new(bridge, deps.ownership));

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;

    let state = AppState {
        hub: hub.clone(),
        router,
        verifier: deps.verifier,
        config: Arc::new(config),
        provider_name: Arc::clone(&provider_name),
        start_time: Instant::now(),
    };

    let shutdown = ShutdownCoordinator::new();
    let token = shutdown.token();
    let server = tokio::spawn(async move {
        let serving = axum::serve(listener, build_router(state))
            .with_graceful_shutdown(async move { token.cancelled().await });
        if let Err(e) = serving.await {
            error!(error = %e, "Server terminated");
        }
    });

    info!(addr = %addr, provider = %provider_name, "Spark hub listening");

    Ok(ServerHandle {
        addr,
        hub,
        shutdown,
        server,
        registry,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    addr: SocketAddr,
    hub: Hub,
    shutdown: ShutdownCoordinator,
    server: JoinHandle<()>,
    registry: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Stop accepting, close every connection and wait for the server tasks.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        self.shutdown
            .graceful_shutdown(&self.hub, vec![self.server, self.registry], timeout)
            .await;
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    #[serde(default)]
    token: String,
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Authenticate, then upgrade. Failed credentials never reach the upgrade.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user_id = match state.verifier.verify(&query.token) {
        Ok(user_id) => user_id,
        Err(AuthError::Missing) => return unauthorized(ERR_TOKEN_REQUIRED),
        Err(e) => {
            debug!(error = %e, "Rejecting upgrade");
            return unauthorized(ERR_TOKEN_INVALID);
        }
    };

    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.max_message_size(state.config.hub.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: UserId, state: AppState) {
    let (conn, mailbox) = Connection::new(user_id, state.config.hub.mailbox_capacity);
    if let Err(e) = state.hub.admit(Arc::clone(&conn)).await {
        warn!(connection_id = %conn.id(), error = %e, "Registry unavailable, dropping connection");
        return;
    }
    serve_connection(
        socket,
        conn,
        mailbox,
        state.hub.clone(),
        Arc::clone(&state.router),
        state.config.hub.clone(),
    )
    .await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(health_check(state.start_time, state.hub.count(), &state.provider_name))
}
