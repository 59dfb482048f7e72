//! HTTP + WebSocket API for Facegate
//!
//! A mobile client drives a device-fed session: it reports the permission
//! outcome and streams face counts or GPS fixes, and listens on the
//! WebSocket for status and the terminal event.
//!
//! Endpoints:
//! - GET /health - Health check
//! - POST /session/new - Create session
//! - GET /session/{id} - Session state and latest status
//! - POST /session/{id}/permission - Permission outcome
//! - POST /session/{id}/signal - One face tick or location fix
//! - POST /session/{id}/fire - Manual fire
//! - DELETE /session/{id} - Unmount
//! - WS /ws/{id} - Live `SessionEvent` stream
//!
//! Finished sessions stay readable for `SESSION_RETENTION_MS`, then are dropped.

use axum::{
    extract::{Path, State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;
use crate::{EVENT_BUFFER, SESSION_RETENTION_MS};
use crate::core::capability::{CapabilityConfig, DeviceFeed, FeedError, PermissionAnswer};
use crate::core::observer::BroadcastObserver;
use crate::core::session::{SessionConfig, SessionHandle, VerificationSession};
use crate::core::verifier::RemoteVerifier;
use crate::types::{
    ConfigError, FaceBounds, FaceTick, FallbackPolicy, LocationFix, RawSignal, SessionEvent,
    SessionReport, SessionState, StatusOutput, StatusSnapshot, VerificationKind,
};

/// One device-fed session
pub struct ApiSession {
    pub handle: SessionHandle,
    pub feed: DeviceFeed,
    pub observer: BroadcastObserver,
}

/// App state
pub struct AppState {
    pub sessions: RwLock<HashMap<Uuid, ApiSession>>,
    pub verifier: Option<Arc<dyn RemoteVerifier>>,
}

/// API failures, mapped onto status codes
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown session {0}")]
    NotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("malformed signal: {0}")]
    BadSignal(String),

    #[error("session task failed")]
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Config(_) | ApiError::BadSignal(_) => StatusCode::BAD_REQUEST,
            ApiError::Feed(FeedError::WrongKind { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Feed(FeedError::AlreadyAnswered) | ApiError::Feed(FeedError::NotGranted) => {
                StatusCode::CONFLICT
            }
            ApiError::Feed(FeedError::Closed) => StatusCode::GONE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Create new session request
#[derive(Debug, Default, Deserialize)]
pub struct NewSessionRequest {
    /// Defaults to face
    #[serde(default)]
    pub kind: Option<VerificationKind>,
    /// Partial policy; omitted fields take the defaults for `kind`
    #[serde(default)]
    pub policy: Option<serde_json::Value>,
}

/// Create new session response
#[derive(Debug, Serialize, Deserialize)]
pub struct NewSessionResponse {
    pub session_id: Uuid,
    pub kind: VerificationKind,
    pub websocket_url: String,
    pub policy: FallbackPolicy,
}

/// Session status response
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_id: Uuid,
    pub kind: VerificationKind,
    pub state: SessionState,
    pub mounted: bool,
    pub snapshot: Option<StatusSnapshot>,
    pub status: Option<StatusOutput>,
}

/// Permission outcome from the device
#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub granted: bool,
    /// No hardware on the device; wins over `granted`
    #[serde(default)]
    pub unavailable: bool,
}

/// One signal from the device
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SignalRequest {
    Face {
        faces_present: u32,
        #[serde(default)]
        bounds: Vec<FaceBounds>,
        /// Base64 frame for the remote verifier
        #[serde(default)]
        image: Option<String>,
    },
    Location {
        fix: Option<LocationFix>,
    },
}

impl SignalRequest {
    fn into_signal(self) -> Result<RawSignal, ApiError> {
        match self {
            SignalRequest::Face { faces_present, bounds, image } => {
                let tick = FaceTick {
                    faces_present,
                    bounds,
                    capture: None,
                };
                let tick = match image {
                    Some(image) => tick
                        .with_image(&image)
                        .map_err(|e| ApiError::BadSignal(format!("image: {}", e)))?,
                    None => tick,
                };
                Ok(RawSignal::face(tick))
            }
            SignalRequest::Location { fix } => Ok(RawSignal::location(fix)),
        }
    }
}

/// Accepted command response
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
    pub state: SessionState,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions_active: usize,
}

/// Create the API router; sessions verify remotely when a verifier is given
pub fn create_router(verifier: Option<Arc<dyn RemoteVerifier>>) -> Router {
    let state = Arc::new(AppState {
        sessions: RwLock::new(HashMap::new()),
        verifier,
    });

    Router::new()
        .route("/health", get(health))
        .route("/session/new", post(create_session))
        .route("/session/:id", get(get_session).delete(delete_session))
        .route("/session/:id/permission", post(answer_permission))
        .route("/session/:id/signal", post(push_signal))
        .route("/session/:id/fire", post(fire_session))
        .route("/ws/:id", get(websocket_handler))
        .with_state(state)
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::NotFound(id.to_string()))
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let sessions = state.sessions.read().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        sessions_active: sessions.values().filter(|s| !s.handle.state().is_terminal()).count(),
    })
}

/// Create new device-fed session
async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewSessionRequest>,
) -> Result<Json<NewSessionResponse>, ApiError> {
    let kind = req.kind.unwrap_or(VerificationKind::Face);
    let policy = match req.policy {
        Some(partial) => FallbackPolicy::merged(kind, partial)?,
        None => FallbackPolicy::for_kind(kind),
    };

    let (capability, feed) = CapabilityConfig::Device.build(kind)?;
    let feed = feed.ok_or(ApiError::Internal)?;
    let observer = BroadcastObserver::new(EVENT_BUFFER);

    let mut config = SessionConfig::new(capability, Arc::new(observer.clone())).with_policy(policy.clone());
    if let Some(verifier) = &state.verifier {
        config = config.with_verifier(verifier.clone());
    }
    let handle = VerificationSession::spawn(config)?;
    let session_id = handle.id();
    info!(%session_id, %kind, "api session created");

    tokio::spawn(evict_when_done(state.clone(), session_id, handle.subscribe_state()));
    let mut sessions = state.sessions.write().await;
    sessions.insert(session_id, ApiSession { handle, feed, observer });

    Ok(Json(NewSessionResponse {
        session_id,
        kind,
        websocket_url: format!("/ws/{}", session_id),
        policy,
    }))
}

/// Forget a session once it has been terminal for `SESSION_RETENTION_MS`
async fn evict_when_done(state: Arc<AppState>, session_id: Uuid, mut state_rx: watch::Receiver<SessionState>) {
    // Closed channel: unmounted through DELETE before reaching a terminal state
    let finished = state_rx.wait_for(|s| s.is_terminal()).await.is_ok();
    if !finished {
        return;
    }
    tokio::time::sleep(Duration::from_millis(SESSION_RETENTION_MS)).await;

    let session = state.sessions.write().await.remove(&session_id);
    if let Some(session) = session {
        if let Some(report) = session.handle.wait().await {
            info!(%session_id, final_state = %report.final_state, "api session evicted");
        }
    }
}

/// Get session status
async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let session_id = parse_id(&id)?;
    let sessions = state.sessions.read().await;
    let session = sessions.get(&session_id).ok_or(ApiError::NotFound(id))?;
    let (snapshot, status) = match session.observer.latest() {
        Some((snapshot, status)) => (Some(snapshot), Some(status)),
        None => (None, None),
    };

    Ok(Json(SessionStatusResponse {
        session_id,
        kind: session.handle.kind(),
        state: session.handle.state(),
        mounted: session.handle.is_mounted(),
        snapshot,
        status,
    }))
}

/// Report the permission outcome
async fn answer_permission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PermissionRequest>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let session_id = parse_id(&id)?;
    let sessions = state.sessions.read().await;
    let session = sessions.get(&session_id).ok_or(ApiError::NotFound(id))?;

    let answer = match (req.unavailable, req.granted) {
        (true, _) => PermissionAnswer::Unavailable,
        (false, true) => PermissionAnswer::Granted,
        (false, false) => PermissionAnswer::Denied,
    };
    session.feed.answer_permission(answer)?;

    Ok(Json(AcceptedResponse {
        accepted: true,
        state: session.handle.state(),
    }))
}

/// Push one signal into the session
async fn push_signal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let session_id = parse_id(&id)?;
    let signal = serde_json::from_value::<SignalRequest>(body)
        .map_err(|e| ApiError::BadSignal(e.to_string()))?
        .into_signal()?;

    // Don't hold the map across a possibly full channel
    let feed = {
        let sessions = state.sessions.read().await;
        sessions.get(&session_id).ok_or(ApiError::NotFound(id))?.feed.clone()
    };
    feed.push(signal).await?;

    let sessions = state.sessions.read().await;
    let state = sessions
        .get(&session_id)
        .map(|s| s.handle.state())
        .unwrap_or(SessionState::Idle);
    Ok(Json(AcceptedResponse { accepted: true, state }))
}

/// Manual fire
async fn fire_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let session_id = parse_id(&id)?;
    let sessions = state.sessions.read().await;
    let session = sessions.get(&session_id).ok_or(ApiError::NotFound(id))?;

    Ok(Json(AcceptedResponse {
        accepted: session.handle.fire(),
        state: session.handle.state(),
    }))
}

/// Unmount and forget the session
async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionReport>, ApiError> {
    let session_id = parse_id(&id)?;
    let session = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id).ok_or(ApiError::NotFound(id))?
    };
    session.handle.unmount();
    let report = session.handle.wait().await.ok_or(ApiError::Internal)?;
    info!(%session_id, final_state = %report.final_state, "api session removed");
    Ok(Json(report))
}

/// WebSocket handler for live updates
async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = parse_id(&id)?;
    let sessions = state.sessions.read().await;
    let session = sessions.get(&session_id).ok_or(ApiError::NotFound(id))?;
    let rx = session.observer.subscribe();
    let latest = session.observer.latest();
    drop(sessions);

    Ok(ws.on_upgrade(move |socket| async move {
        handle_websocket(socket, latest, rx).await;
    }))
}

/// Handle WebSocket connection
async fn handle_websocket(
    mut socket: WebSocket,
    latest: Option<(StatusSnapshot, StatusOutput)>,
    mut rx: broadcast::Receiver<SessionEvent>,
) {
    if let Some((snapshot, output)) = latest {
        let json = serde_json::to_string(&SessionEvent::Status { snapshot, output }).unwrap_or_default();
        if socket.send(Message::Text(json)).await.is_err() {
            return;
        }
    }
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "websocket client lagging");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let json = serde_json::to_string(&event).unwrap_or_default();
        if socket.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
}

/// Run the API server
pub async fn run_server(
    addr: &str,
    verifier: Option<Arc<dyn RemoteVerifier>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let remote = verifier.is_some();
    let router = create_router(verifier);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, remote, "api listening");
    println!("Facegate API running on {}", addr);
    println!("  POST   /session/new            - Create session");
    println!("  GET    /session/:id            - Get status");
    println!("  POST   /session/:id/permission - Permission outcome");
    println!("  POST   /session/:id/signal     - Push signal");
    println!("  POST   /session/:id/fire       - Manual fire");
    println!("  DELETE /session/:id            - Unmount");
    println!("  WS     /ws/:id                 - Live updates");
    println!("  GET    /health                 - Health check");
    axum::serve(listener, router).await?;
    Ok(())
}
