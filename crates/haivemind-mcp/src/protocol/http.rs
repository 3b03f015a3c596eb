//! HTTP transport for MCP (Streamable HTTP).
//!
//! Endpoints:
//! - POST /mcp    — JSON-RPC request → SSE or JSON response
//! - GET  /sse    — standalone SSE stream for server-initiated notifications
//! - DELETE /mcp  — terminate a session
//! - GET  /health — liveness probe, no auth required
//!
//! `POST /mcp` and `GET /sse` require `Authorization: Bearer <token>` when
//! `mcp.http.authToken` is configured; a global rate limit and concurrency
//! cap apply to every route but `/health`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{sse::Event, IntoResponse, Response, Sse},
    routing::{delete, get, post},
    Router,
};
use futures::stream;
use haivemind_core::{AgentRegistry, Config, EventBus, Storage};
use tokio::sync::Mutex;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;
use crate::tools::format_guide::FormatGuideTracker;

struct Session {
    server: Mutex<McpServer>,
}

struct AppState {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    storage: Arc<Storage>,
    registry: Arc<AgentRegistry>,
    bus: Arc<EventBus>,
    format_guide: Arc<FormatGuideTracker>,
    auth_token: Option<String>,
    peer_count: usize,
    started_at: Instant,
}

pub struct HttpTransportConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,
    pub rate_limit_rps: u32,
    pub max_concurrent: u32,
}

impl HttpTransportConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            auth_token: config.mcp.http.auth_token.clone(),
            rate_limit_rps: config.mcp.http.rate_limit_rps,
            max_concurrent: config.mcp.http.max_concurrent,
        }
    }
}

pub struct HttpTransport {
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        self,
        storage: Arc<Storage>,
        registry: Arc<AgentRegistry>,
        bus: Arc<EventBus>,
        format_guide: Arc<FormatGuideTracker>,
        peer_count: usize,
    ) -> Result<(), std::io::Error> {
        let state = Arc::new(AppState {
            sessions: Mutex::new(HashMap::new()),
            storage,
            registry,
            bus,
            format_guide,
            auth_token: self.config.auth_token.clone(),
            peer_count,
            started_at: Instant::now(),
        });

        let authenticated = Router::new()
            .route("/mcp", post(handle_post))
            .route("/mcp", delete(handle_delete))
            .route("/sse", get(handle_sse))
            .layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
            .layer(ConcurrencyLimitLayer::new(self.config.max_concurrent as usize))
            .layer(tower::limit::RateLimitLayer::new(
                self.config.rate_limit_rps.max(1) as u64,
                Duration::from_secs(1),
            ));

        // MCP clients talk to this server from browser-hosted agents on other
        // origins; the bearer token (when configured) is the real gate, so
        // CORS stays permissive rather than duplicating an origin allowlist.
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        let app = Router::new()
            .route("/health", get(handle_health))
            .merge(authenticated)
            .layer(cors)
            .with_state(state);

        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        info!("MCP HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("MCP HTTP server shutting down");
        Ok(())
    }
}

async fn require_bearer_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.auth_token else {
        return next.run(request).await;
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response(),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let body = serde_json::json!({
        "status": "ok",
        "build": env!("CARGO_PKG_VERSION"),
        "uptimeS": state.started_at.elapsed().as_secs(),
        "peerCount": state.peer_count,
    });
    (StatusCode::OK, axum::Json(body)).into_response()
}

async fn get_or_create_session(state: &AppState, headers: &HeaderMap) -> (Arc<Session>, String) {
    let existing_id = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let mut sessions = state.sessions.lock().await;

    if let Some(id) = &existing_id {
        if let Some(session) = sessions.get(id) {
            return (session.clone(), id.clone());
        }
    }

    let session_id = Uuid::new_v4().to_string();
    let server = McpServer::new(
        state.storage.clone(),
        state.registry.clone(),
        state.bus.clone(),
        state.format_guide.clone(),
    );
    let session = Arc::new(Session { server: Mutex::new(server) });
    sessions.insert(session_id.clone(), session.clone());
    info!(session_id, "created new MCP session");
    (session, session_id)
}

async fn get_existing_session(state: &AppState, headers: &HeaderMap) -> Option<(Arc<Session>, String)> {
    let id = headers.get("mcp-session-id").and_then(|v| v.to_str().ok())?;
    let sessions = state.sessions.lock().await;
    sessions.get(id).map(|s| (s.clone(), id.to_string()))
}

async fn handle_post(State(state): State<Arc<AppState>>, headers: HeaderMap, body: String) -> Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!("failed to parse JSON-RPC request: {}", e);
            let error_resp = JsonRpcResponse::error(None, JsonRpcError::parse_error());
            return (
                StatusCode::BAD_REQUEST,
                [(header::CONTENT_TYPE, "application/json")],
                serde_json::to_string(&error_resp).unwrap_or_default(),
            )
                .into_response();
        }
    };

    let (session, session_id) = get_or_create_session(&state, &headers).await;

    let mut server = session.server.lock().await;
    let response = server.handle_request(request).await;
    drop(server);

    match response {
        Some(resp) => {
            let json = serde_json::to_string(&resp).unwrap_or_else(|e| {
                error!("failed to serialize response: {}", e);
                r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#.to_string()
            });

            let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()).unwrap_or("application/json");

            if accept.contains("text/event-stream") {
                let event = Event::default().data(&json);
                let sse_stream = stream::once(async move { Ok::<_, std::convert::Infallible>(event) });
                (
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE.as_str(), "text/event-stream"),
                        ("mcp-session-id", &session_id),
                        (header::CACHE_CONTROL.as_str(), "no-cache"),
                    ],
                    Sse::new(sse_stream),
                )
                    .into_response()
            } else {
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE.as_str(), "application/json"), ("mcp-session-id", &session_id)],
                    json,
                )
                    .into_response()
            }
        }
        None => (StatusCode::ACCEPTED, [("mcp-session-id", session_id.as_str())]).into_response(),
    }
}

/// GET /sse — standalone server-push stream; a client must `POST /mcp` at
/// least once first so there is a session to attach to.
async fn handle_sse(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match get_existing_session(&state, &headers).await {
        Some((_session, session_id)) => {
            let events = vec![Ok::<_, std::convert::Infallible>(Event::default().comment("connected"))];
            let sse_stream = stream::iter(events);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE.as_str(), "text/event-stream"),
                    ("mcp-session-id", session_id.as_str()),
                    (header::CACHE_CONTROL.as_str(), "no-cache"),
                ],
                Sse::new(sse_stream),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "no active session; POST /mcp first").into_response(),
    }
}

async fn handle_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let session_id = headers.get("mcp-session-id").and_then(|v| v.to_str().ok());
    match session_id {
        Some(id) => {
            let mut sessions = state.sessions.lock().await;
            if sessions.remove(id).is_some() {
                info!(session_id = id, "terminated MCP session");
                StatusCode::OK.into_response()
            } else {
                (StatusCode::NOT_FOUND, "session not found").into_response()
            }
        }
        None => (StatusCode::BAD_REQUEST, "missing mcp-session-id header").into_response(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
