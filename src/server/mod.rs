//! HTTP and websocket server
//!
//! Router assembly, shared state and the API error type. Startup order:
//! load config, open the database, construct service clients, construct
//! the room manager, register handlers, serve. Shutdown tears down in
//! reverse by dropping the state bundle after the listener closes.

pub mod auth;
pub mod http;
pub mod meeting_ws;

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::room::RoomManager;
use crate::services::Services;
use crate::store::MeetingStore;

use auth::OidcVerifier;

/// Shared server state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<MeetingStore>,
    pub rooms: Arc<RoomManager>,
    pub services: Services,
    pub oidc: Option<Arc<OidcVerifier>>,
}

/// API-boundary error mapped onto status codes per the error policy:
/// client errors 4xx with no state change, auth failures 401, missing
/// artifacts 404, unconfigured dependencies 503, everything else 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            ApiError::Internal(e) => {
                warn!("internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the application state from configuration.
pub async fn build_state(config: Config) -> Result<AppState> {
    let store = MeetingStore::open(&config.database.path)
        .await
        .context("failed to open meeting store")?;
    let services =
        Services::from_config(&config.services).context("failed to construct service clients")?;
    let oidc = if config.oidc.is_configured() {
        Some(Arc::new(OidcVerifier::new(&config.oidc)?))
    } else {
        None
    };

    Ok(AppState {
        config: Arc::new(config),
        store: Arc::new(store),
        rooms: Arc::new(RoomManager::new()),
        services,
        oidc,
    })
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(http::status_handler))
        .route("/api/meetings", post(http::create_meeting_handler))
        .route("/api/meetings/{code}", get(http::get_meeting_handler))
        .route("/api/meetings/{code}/join", post(http::join_meeting_handler))
        .route(
            "/api/meetings/{code}/speakers/{speaker_id}",
            post(http::rename_speaker_handler),
        )
        .route(
            "/api/meetings/{code}/transcript",
            get(http::live_transcript_handler),
        )
        .route(
            "/api/meetings/{code}/transcript-snapshot",
            get(http::snapshot_handler),
        )
        .route(
            "/api/meetings/{code}/transcript-snapshots",
            get(http::snapshot_list_handler),
        )
        .route("/api/meetings/{code}/end", post(http::end_meeting_handler))
        .route("/api/meetings/{code}/minutes", get(http::minutes_handler))
        .route("/api/chat/sessions", post(http::create_chat_session_handler))
        .route("/api/chat/query", post(http::chat_query_handler))
        .route("/ws/meeting/{meeting_id}", get(meeting_ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server and block until shutdown.
pub async fn start(config: Config) -> Result<()> {
    if config.server.allowed_origins.is_empty() {
        warn!("no websocket origin allow-list configured; running in permissive development mode");
    }

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;

    let state = build_state(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    Ok(())
}
