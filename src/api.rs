use crate::broadcast::Broadcaster;
use crate::errors::{DaemonError, Result};
use crate::history::{HistoryStats, LifecycleRecord, SessionHistory};
use crate::moonraker::{MoonrakerClient, StatusAcquirer};
use crate::status::PrinterStatus;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// HTTP API server state
#[derive(Clone)]
pub struct ApiState {
    pub acquirer: Arc<StatusAcquirer>,
    pub broadcaster: Arc<Broadcaster>,
    pub moonraker: Arc<MoonrakerClient>,
    pub history: Arc<Mutex<SessionHistory>>,
    /// Daemon start time for uptime calculation
    pub start_time: std::time::Instant,
}

/// Envelope for the status query.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub data: PrinterStatus,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Liveness of the Moonraker link, from the last acquired snapshot.
    pub moonraker: String,
    pub timestamp: i64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            DaemonError::Upstream(msg) | DaemonError::Network(msg) => (StatusCode::NOT_FOUND, msg),
            DaemonError::Config(msg) => (StatusCode::BAD_REQUEST, msg),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            success: false,
            error: message,
        });

        (status, body).into_response()
    }
}

/// GET /api/status - Current normalized printer status
///
/// A disconnected snapshot is still a success response; the sentinel is
/// how transport failure reaches displays, not an error payload.
async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let status = state.acquirer.fetch().await;

    // The poll path feeds the same lifecycle session as the push path.
    state.history.lock().await.observe(&status);

    Json(StatusResponse {
        success: true,
        data: status,
    })
}

/// GET /api/health - Health check endpoint
async fn handle_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let connected = state.acquirer.is_connected().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        moonraker: if connected { "connected" } else { "disconnected" }.to_string(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

/// GET /api/history - Lifecycle records observed by the server session
async fn handle_history(State(state): State<ApiState>) -> Json<Vec<LifecycleRecord>> {
    Json(state.history.lock().await.records())
}

/// GET /api/history/stats - Aggregate history stats
async fn handle_history_stats(State(state): State<ApiState>) -> Json<HistoryStats> {
    Json(state.history.lock().await.stats())
}

/// GET /thumbnail/{path} - Local indirection for preview images
///
/// Remote clients cannot reach the Moonraker host, so thumbnail
/// references resolve through this proxy instead of an upstream URL.
async fn handle_thumbnail(
    State(state): State<ApiState>,
    Path(path): Path<String>,
) -> Result<Response> {
    let upstream = state.moonraker.fetch_gcode_file(&path).await?;

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/png")
        .to_string();

    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| DaemonError::Network(e.to_string()))?;

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// GET /ws - Observer push channel
async fn handle_ws(State(state): State<ApiState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| observer_loop(socket, state.broadcaster.clone()))
}

/// Forward broadcast frames to one observer until either side drops.
async fn observer_loop(mut socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let (id, mut rx) = broadcaster.subscribe().await;

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        debug!("Observer {} socket send failed", id);
                        break;
                    }
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                // Observers only listen; anything they send is ignored.
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    broadcaster.unsubscribe(id).await;
}

/// Create HTTP API router
pub fn create_router(state: ApiState, cors_enabled: bool) -> Router {
    let router = Router::new()
        .route("/api/status", get(handle_status))
        .route("/api/health", get(handle_health))
        .route("/api/history", get(handle_history))
        .route("/api/history/stats", get(handle_history_stats))
        .route("/thumbnail/*path", get(handle_thumbnail))
        .route("/ws", get(handle_ws))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state);

    if cors_enabled {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Start HTTP API server
pub async fn start_api_server(
    addr: &str,
    state: ApiState,
    cors_enabled: bool,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state, cors_enabled);

    info!("Starting HTTP API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!("HTTP API server error: {}", e);
            e.into()
        })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
