//! Trigger API route handlers.
//!
//! All responses are JSON. State is shared via `Arc<TriggerState>`.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};

use crate::config::CompetitionConfig;
use crate::engine::Orchestrator;
use crate::types::{PickboardError, RunScope, RunSummary};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct TriggerState {
    pub orchestrator: Orchestrator,
    /// `None` when the secret env var is unset: every non-manual trigger
    /// is then refused with 500.
    pub secret: Option<SecretString>,
    pub allow_manual: bool,
    pub competition: CompetitionConfig,
}

pub type AppState = Arc<TriggerState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Optional body of `POST /api/resolve`; missing fields fall back to the
/// configured competition and its current week.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveRequest {
    pub competition_id: Option<String>,
    pub week: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveQuery {
    #[serde(default)]
    pub manual: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

/// Handler error carrying the status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<PickboardError> for ApiError {
    fn from(err: PickboardError) -> Self {
        let status = match &err {
            PickboardError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PickboardError::RunInProgress(_) => StatusCode::CONFLICT,
            PickboardError::InvalidPick { .. } => StatusCode::BAD_REQUEST,
            PickboardError::Config(_)
            | PickboardError::PriceUnavailable { .. }
            | PickboardError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<PickboardError>() {
            Ok(domain) => domain.into(),
            Err(other) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{other:#}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Decide whether a trigger may run, before any work is done.
fn authorize(state: &TriggerState, headers: &HeaderMap, manual: bool) -> Result<(), ApiError> {
    if manual && state.allow_manual {
        warn!("Manual trigger accepted without secret");
        return Ok(());
    }

    let Some(secret) = &state.secret else {
        error!("Trigger secret is not configured");
        return Err(PickboardError::Config("trigger secret is not configured".into()).into());
    };

    match bearer_token(headers) {
        Some(token) if token_matches(token, secret) => Ok(()),
        Some(_) => Err(PickboardError::Unauthorized("invalid credential".into()).into()),
        None => Err(PickboardError::Unauthorized("missing bearer token".into()).into()),
    }
}

/// Constant-time comparison of the presented token against the secret.
fn token_matches(token: &str, secret: &SecretString) -> bool {
    token
        .as_bytes()
        .ct_eq(secret.expose_secret().as_bytes())
        .into()
}

fn scope_for(state: &TriggerState, body: &Bytes) -> Result<RunScope, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ResolveRequest::default()
    } else {
        serde_json::from_slice::<ResolveRequest>(body).map_err(|e| {
            ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid request body: {e}"))
        })?
    };

    let competition_id = request
        .competition_id
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| state.competition.id.clone());
    let week = match request.week {
        Some(0) => return Err(ApiError::new(StatusCode::BAD_REQUEST, "week must be >= 1")),
        Some(w) => w,
        None => state.competition.week_for(Utc::now().date_naive()),
    };
    Ok(RunScope::new(competition_id, week))
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/resolve
pub async fn trigger_resolve(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RunSummary>, ApiError> {
    authorize(&state, &headers, query.manual)?;
    let scope = scope_for(&state, &body)?;

    info!(scope = %scope, manual = query.manual, "Resolution triggered over HTTP");
    let summary = state.orchestrator.run(&scope).await?;
    Ok(Json(summary))
}

/// GET /health
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            timestamp: Utc::now().to_rfc3339(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
