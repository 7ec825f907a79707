//! REST API endpoints for the safetrail-service.
//!
//! All share operations go through the single [`LiveShareController`] held in
//! [`AppState`], so the service never runs more than one live watch.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Invalid
//! input maps to 400, an expired share to 409, a refused position
//! subscription to 403/503 and store failures to 500.
//!
//! # Example
//!
//! ```ignore
//! use safetrail_service::api;
//!
//! let app = api::router().with_state(state);
//! ```
//!
//! [`LiveShareController`]: safetrail_core::LiveShareController

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use safetrail_core::{
    ActiveShare, Coordinates, Error as CoreError, PositionSample, PositionSourceFailure,
    ShareReceipt, SharedLocationRecord, Timestamp, UserKey, WatchState, active_shares,
};

use crate::positions::PushSummary;
use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        // Sharing
        .route("/api/shares/once", post(share_once))
        .route("/api/shares/live", post(share_live))
        .route("/api/shares/{recipient}/{sender}", delete(stop_sharing))
        // Live watch
        .route("/api/watch", get(get_watch))
        .route("/api/watch/stop", post(stop_watch))
        // Position feed
        .route("/api/positions", post(push_position))
        // Recipient view
        .route("/api/users/{recipient}/shares", get(list_shares))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Current watch state.
    pub watch: WatchState,
    /// Number of stored documents, if the store could be queried.
    pub documents: Option<u64>,
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let documents = match state.store.lock().await.count_documents(None) {
        Ok(count) => Some(count),
        Err(e) => {
            debug!("Health check could not count documents: {}", e);
            None
        }
    };

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        started_at: state.started_at,
        watch: state.controller.state(),
        documents,
    })
}

/// Request body for a one-time share.
#[derive(Debug, Deserialize)]
pub struct OneTimeShareRequest {
    pub sender: UserKey,
    pub recipient: UserKey,
    pub coords: Coordinates,
}

/// Share the sender's position once.
async fn share_once(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OneTimeShareRequest>,
) -> Result<(StatusCode, Json<ShareReceipt>), AppError> {
    let receipt = state
        .controller
        .send_one_time_location(&request.sender, &request.recipient, request.coords)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Request body for a live share.
#[derive(Debug, Deserialize)]
pub struct LiveShareRequest {
    pub sender: UserKey,
    pub recipient: UserKey,
    pub coords: Coordinates,
    /// How long to share, in seconds.
    pub duration_secs: u64,
}

/// Start a live share and watch positions for it.
///
/// Replaces any live watch the service was running.
async fn share_live(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LiveShareRequest>,
) -> Result<(StatusCode, Json<ShareReceipt>), AppError> {
    let receipt = state
        .controller
        .share_live_location(
            &request.sender,
            &request.recipient,
            request.coords,
            Duration::from_secs(request.duration_secs),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Stop sharing and delete the record.
async fn stop_sharing(
    State(state): State<Arc<AppState>>,
    Path((recipient, sender)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let recipient = parse_user(recipient)?;
    let sender = parse_user(sender)?;
    state
        .controller
        .stop_sharing_location(&sender, &recipient)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Current watch state.
async fn get_watch(State(state): State<Arc<AppState>>) -> Json<WatchState> {
    Json(state.controller.state())
}

/// Stop the live watch without touching any record.
async fn stop_watch(State(state): State<Arc<AppState>>) -> Result<Json<WatchState>, AppError> {
    state.controller.stop_live_location_updates().await?;
    Ok(Json(state.controller.state()))
}

/// A position fix posted by the sender's device.
#[derive(Debug, Deserialize)]
pub struct PositionRequest {
    pub coords: Coordinates,
    /// When the fix was taken (Unix milliseconds). Defaults to now.
    #[serde(default)]
    pub captured_at: Option<Timestamp>,
}

/// Feed a position fix to the watch.
async fn push_position(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PositionRequest>,
) -> Result<Json<PushSummary>, AppError> {
    request
        .coords
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let captured_at = request
        .captured_at
        .unwrap_or_else(|| state.controller.clock().now());
    let summary = state
        .positions
        .push(PositionSample::new(request.coords, captured_at))
        .await;
    Ok(Json(summary))
}

/// One entry of a recipient's share list.
#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub sender: UserKey,
    pub sender_name: String,
    pub record: SharedLocationRecord,
    /// Human readable status, e.g. `Live - 42 mins left`.
    pub status: String,
    pub remaining_secs: u64,
}

impl ShareResponse {
    fn new(share: ActiveShare, now: Timestamp) -> Self {
        Self {
            status: share.describe(now),
            remaining_secs: share.time_remaining(now).as_secs(),
            sender: share.sender,
            sender_name: share.sender_name,
            record: share.record,
        }
    }
}

/// Unexpired locations shared with `recipient`.
async fn list_shares(
    State(state): State<Arc<AppState>>,
    Path(recipient): Path<String>,
) -> Result<Json<Vec<ShareResponse>>, AppError> {
    let recipient = parse_user(recipient)?;
    let clock = state.controller.clock();
    let shares = active_shares(state.store.as_ref(), clock.as_ref(), &recipient).await?;
    let now = clock.now();
    Ok(Json(
        shares
            .into_iter()
            .map(|share| ShareResponse::new(share, now))
            .collect(),
    ))
}

fn parse_user(raw: String) -> Result<UserKey, AppError> {
    UserKey::new(raw).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Core(CoreError),
}

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        AppError::Core(e)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Core(e) => match e {
                CoreError::InvalidData(_)
                | CoreError::InvalidDuration(_)
                | CoreError::DurationTooLong { .. }
                | CoreError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
                CoreError::AlreadyExpired { .. } => StatusCode::CONFLICT,
                CoreError::PositionSource(PositionSourceFailure::PermissionDenied) => {
                    StatusCode::FORBIDDEN
                }
                CoreError::PositionSource(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match self {
            AppError::BadRequest(msg) => msg,
            AppError::Core(e) => e.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
