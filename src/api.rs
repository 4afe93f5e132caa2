//! REST adapter over [`CampaignEngine`].

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::engine::{CampaignEngine, LaunchRequest};
use crate::error::{CampaignError, DatabaseError, Error, QualificationError};
use crate::leads::{CampaignKind, RawLead};
use crate::qualification::{ConversationEvent, Stage};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CampaignEngine>,
}

/// Build the router with every campaign and board route.
pub fn routes(engine: Arc<CampaignEngine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/health", get(health))
        .route("/api/campaigns", get(list_campaigns).post(launch_campaign))
        .route("/api/campaigns/preview", post(preview_campaign))
        .route("/api/campaigns/{id}", get(campaign_status))
        .route("/api/campaigns/{id}/cancel", post(cancel_campaign))
        .route("/api/campaigns/{id}/deliveries", post(record_delivery))
        .route("/api/templates/{kind}", get(templates))
        .route("/api/blacklist", post(blacklist_company))
        .route("/api/conversations/events", post(conversation_event))
        .route("/api/leads/{phone}", get(get_lead))
        .route("/api/board", get(board))
        .route("/api/board/move", post(move_lead))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Engine error rendered as a JSON body with a matching status code.
pub struct ApiError(Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Campaign(CampaignError::NotFound { .. })
            | Error::Database(DatabaseError::NotFound { .. })
            | Error::Qualification(QualificationError::LeadNotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Campaign(CampaignError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            Error::Campaign(CampaignError::SetupFailed { .. }) | Error::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::Database(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "Request rejected");
        }

        let mut body = serde_json::json!({ "error": self.0.to_string() });
        if let Error::Campaign(CampaignError::SetupFailed { id, .. }) = &self.0 {
            body["campaign_id"] = serde_json::json!(id);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "lead-dispatch"
    }))
}

// ── Campaigns ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PreviewRequest {
    kind: CampaignKind,
    leads: Vec<RawLead>,
    /// Cap on each rejection list in the response. Counts are unaffected.
    #[serde(default)]
    report_limit: Option<usize>,
}

async fn preview_campaign(
    State(state): State<AppState>,
    Json(body): Json<PreviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut preview = state.engine.preview_campaign(&body.leads, body.kind).await?;
    if let Some(limit) = body.report_limit {
        preview.report = preview.report.truncated(limit);
    }
    Ok(Json(preview))
}

async fn launch_campaign(
    State(state): State<AppState>,
    Json(body): Json<LaunchRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state.engine.launch_campaign(body).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn list_campaigns(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.list_campaigns().await)
}

async fn campaign_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.get_campaign_status(&id).await?))
}

async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.cancel_campaign(&id).await?))
}

#[derive(Deserialize)]
struct DeliveryRequest {
    phone: String,
}

/// Gateway delivery receipt for one lead of a campaign.
async fn record_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DeliveryRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.record_delivery(&id, &body.phone).await?))
}

async fn templates(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kind: CampaignKind = kind.parse()?;
    Ok(Json(state.engine.default_templates(kind)))
}

#[derive(Deserialize)]
struct BlacklistRequest {
    company: String,
}

async fn blacklist_company(
    State(state): State<AppState>,
    Json(body): Json<BlacklistRequest>,
) -> ApiResult<impl IntoResponse> {
    state.engine.blacklist_company(&body.company).await?;
    Ok(Json(serde_json::json!({"status": "blacklisted"})))
}

// ── Qualification ───────────────────────────────────────────────────────

async fn conversation_event(
    State(state): State<AppState>,
    Json(event): Json<ConversationEvent>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.record_conversation_event(&event).await?))
}

async fn get_lead(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let lead = state
        .engine
        .get_lead(&phone)
        .await?
        .ok_or(QualificationError::LeadNotFound { phone })?;
    Ok(Json(lead))
}

async fn board(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.get_board().await?))
}

#[derive(Deserialize)]
struct MoveRequest {
    phone: String,
    stage: String,
}

async fn move_lead(
    State(state): State<AppState>,
    Json(body): Json<MoveRequest>,
) -> ApiResult<impl IntoResponse> {
    let stage: Stage = body.stage.parse()?;
    Ok(Json(state.engine.move_lead(&body.phone, stage).await?))
}
