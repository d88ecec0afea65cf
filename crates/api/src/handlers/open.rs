//! Handlers for the public submission endpoints.
//!
//! Domain rejections (bad value, exhausted key, full service, plugin refusal)
//! are returned as `200` with `success: false` in the outcome.

use axum::extract::{Path, State};
use axum::Json;
use panelgate_core::quota::QuotaCheck;
use panelgate_core::slots::SlotSummary;
use panelgate_core::types::DbId;
use serde::Deserialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;
use crate::submission::{OnlineServices, SubmissionOutcome, SubmissionRequest};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Request body for the quota check endpoint.
#[derive(Debug, Deserialize)]
pub struct QuotaCheckRequest {
    pub key: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /open/submit
///
/// Submit a value to an environment.
pub async fn submit(
    State(state): State<AppState>,
    Json(input): Json<SubmissionRequest>,
) -> AppResult<Json<DataResponse<SubmissionOutcome>>> {
    let outcome = state.submissions.submit_variable(input).await?;
    Ok(Json(DataResponse { data: outcome }))
}

/// GET /open/services
///
/// Enabled environments with their current free slots.
pub async fn services(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<OnlineServices>>> {
    let services = state.submissions.online_services().await?;
    Ok(Json(DataResponse { data: services }))
}

/// GET /open/envs/{id}/slots
pub async fn env_slots(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<SlotSummary>>> {
    let slots = state.submissions.calculate_available_slots(id).await?;
    Ok(Json(DataResponse { data: slots }))
}

/// POST /open/quota/check
pub async fn check_quota(
    State(state): State<AppState>,
    Json(input): Json<QuotaCheckRequest>,
) -> AppResult<Json<DataResponse<QuotaCheck>>> {
    let check = state.submissions.check_quota(&input.key).await?;
    Ok(Json(DataResponse { data: check }))
}
