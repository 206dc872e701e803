use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tandem_engine::RelayLimits;
use tandem_store::ChatStore;

use crate::client;
use crate::context::ChatContext;
use crate::http;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    /// A socket that has not joined by then is closed.
    pub join_timeout: Duration,
    pub cleanup_interval: Duration,
    pub relay: RelayLimits,
    pub recent_messages_limit: u32,
    /// Zero ends a pairing as soon as a user's last session drops.
    pub disconnect_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            join_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
            relay: RelayLimits::default(),
            recent_messages_limit: 50,
            disconnect_grace: Duration::ZERO,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ChatContext>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(http::health))
        .route("/api/auth/register", post(http::register))
        .route("/api/auth/login", post(http::login))
        .route("/api/auth/user/{username}", get(http::user_by_username))
        .route("/api/auth/user/id/{id}", get(http::user_by_id))
        .route("/api/connection-request", post(http::create_request))
        .route("/api/connection-requests/{username}", get(http::pending_requests))
        .route("/api/connection-request/{id}/accept", post(http::accept_request))
        .route("/api/connection-request/{id}/reject", post(http::reject_request))
        .route("/api/connection/{id}/disconnect", post(http::disconnect))
        .route("/api/connection/{id}/current", get(http::current_connection))
        .route("/api/messages/{id}", get(http::messages))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, serve and start background tasks.
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn ChatStore>,
) -> Result<ServerHandle, std::io::Error> {
    let addr = format!("{}:{}", config.host, config.port);
    let cleanup_interval = config.cleanup_interval;
    let ctx = ChatContext::new(store, config);

    let cleanup_task = client::start_cleanup_task(Arc::clone(&ctx), cleanup_interval);

    let router = build_router(AppState {
        ctx: Arc::clone(&ctx),
    });
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), host = %local_addr.ip(), "Tandem server started");

    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        ctx,
        server_task,
        cleanup_task,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    pub ctx: Arc<ChatContext>,
    server_task: tokio::task::JoinHandle<()>,
    cleanup_task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.server_task.abort();
        self.cleanup_task.abort();
        for transport in self.ctx.registry.all_transports() {
            transport.close();
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    client::handle_ws_connection(socket, state.ctx).await;
}
