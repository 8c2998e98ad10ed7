//! HTTP route definitions

use axum::{
    extract::{Extension, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::lobby::LobbyMember;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::{AircraftKind, Loadout, SessionSettings};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/lobby/join", post(lobby_join_handler))
        .route("/lobby/start", post(lobby_start_handler))
        .route("/pilot/stats", get(pilot_stats_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_sessions: usize,
    active_players: usize,
    open_lobbies: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let open_lobbies = state.director.lobby_count().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_sessions: state.session_registry.active_sessions(),
        active_players: state.session_registry.total_players(),
        open_lobbies,
    })
}

// ============================================================================
// Lobby endpoints
// ============================================================================

#[derive(Deserialize)]
struct LobbyJoinRequest {
    lobby_id: Option<Uuid>,
    #[serde(default)]
    aircraft: AircraftKind,
    #[serde(default)]
    loadout: Loadout,
    settings: Option<SessionSettings>,
}

#[derive(Serialize)]
struct LobbyJoinResponse {
    status: &'static str,
    lobby_id: Uuid,
    ws_url: String,
}

async fn lobby_join_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<LobbyJoinRequest>,
) -> Result<Json<LobbyJoinResponse>, AppError> {
    let callsign = state
        .profiles
        .ensure_profile(
            auth.account_id,
            &format!("Pilot_{}", &auth.account_id.to_string()[..8]),
        )
        .await
        .ok()
        .and_then(|p| p.callsign)
        .unwrap_or_else(|| format!("Pilot_{}", &auth.account_id.to_string()[..8]));

    let member = LobbyMember::new(auth.account_id, callsign, req.aircraft, req.loadout);
    let lobby_id = state
        .director
        .join_lobby(member, req.lobby_id, req.settings)
        .await
        .ok_or_else(|| AppError::BadRequest("Lobby is full".to_string()))?;

    let ws_url = format!(
        "{}/ws",
        state
            .config
            .public_base_url
            .replace("https://", "wss://")
            .replace("http://", "ws://")
    );

    Ok(Json(LobbyJoinResponse {
        status: "joined",
        lobby_id,
        ws_url,
    }))
}

#[derive(Serialize)]
struct LobbyStartResponse {
    status: &'static str,
}

async fn lobby_start_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<LobbyStartResponse>, AppError> {
    state.director.start_lobby(auth.account_id).await;
    Ok(Json(LobbyStartResponse { status: "starting" }))
}

// ============================================================================
// Pilot endpoints
// ============================================================================

#[derive(Serialize)]
struct PilotStatsResponse {
    account_id: Uuid,
    callsign: Option<String>,
    in_session: Option<Uuid>,
}

async fn pilot_stats_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<PilotStatsResponse>, AppError> {
    let profile = state
        .profiles
        .get_profile(auth.account_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(PilotStatsResponse {
        account_id: auth.account_id,
        callsign: profile.and_then(|p| p.callsign),
        in_session: state.director.session_of(&auth.account_id),
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
