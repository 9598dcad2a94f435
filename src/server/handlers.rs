use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::auth::Owner;
use super::error::ApiError;
use super::AppState;
use crate::reconcile::ReconcileOutcome;
use crate::types::{
    CallbackPayload, ExecutionListFilter, ExecutionRecord, ExecutionStatus, SubmissionRequest,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub execution_id: String,
    /// `accepted` or `already_terminal`
    pub outcome: String,
    pub status: ExecutionStatus,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn submit(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    body: Result<Json<SubmissionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ExecutionRecord>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let record = state.submissions.submit(&owner_id, request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<ExecutionStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let filter = ExecutionListFilter {
        status,
        limit: query.limit,
    };
    Ok(Json(state.store.list_for_owner(&owner_id, &filter).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(execution_id): Path<String>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    state
        .store
        .get_for_owner(&owner_id, &execution_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn webhook(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    body: Result<Json<CallbackPayload>, JsonRejection>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Json(payload) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let outcome = state.reconciler.reconcile_callback(&execution_id, payload).await?;

    let label = match &outcome {
        ReconcileOutcome::Applied(_) => "accepted",
        ReconcileOutcome::AlreadyTerminal(_) => "already_terminal",
    };
    Ok(Json(WebhookResponse {
        execution_id,
        outcome: label.to_string(),
        status: outcome.record().status,
    }))
}
