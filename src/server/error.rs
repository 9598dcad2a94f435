use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::{ArchiveError, GatewayError, ReconcileError, StoreError, SubmissionError};

/// Error body: `{"error": <code>, "message": <text>}`
#[derive(Debug)]
pub enum ApiError {
    Submission(SubmissionError),
    Reconcile(ReconcileError),
    Store(StoreError),
    BadRequest(String),
    Unauthorized(String),
    NotFound,
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        ApiError::Submission(err)
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        ApiError::Reconcile(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Submission(err) => match err {
                SubmissionError::InvalidRequest { .. } => {
                    (StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
                }
                SubmissionError::Archive(ArchiveError::TemplateRender { .. })
                | SubmissionError::Archive(ArchiveError::MalformedTemplate { .. }) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "template_render",
                    err.to_string(),
                ),
                SubmissionError::Archive(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "archive_packaging",
                    err.to_string(),
                ),
                SubmissionError::Gateway(GatewayError::Unreachable { .. }) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "gateway_unreachable",
                    "execution engine is unreachable, please try again".to_string(),
                ),
                SubmissionError::Gateway(GatewayError::Rejected { .. }) => {
                    (StatusCode::BAD_GATEWAY, "gateway_rejected", err.to_string())
                }
                SubmissionError::Gateway(GatewayError::Protocol { .. }) => {
                    (StatusCode::BAD_GATEWAY, "gateway_protocol", err.to_string())
                }
                SubmissionError::RecordPersistFailure { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "record_persist_failure",
                    err.to_string(),
                ),
            },
            ApiError::Reconcile(err) => match err {
                ReconcileError::UnknownExecution { .. } => {
                    (StatusCode::NOT_FOUND, "unknown_execution", err.to_string())
                }
                ReconcileError::InvalidCallbackStatus { .. } => {
                    (StatusCode::BAD_REQUEST, "invalid_callback", err.to_string())
                }
                ReconcileError::Store(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_unavailable",
                    "execution store unavailable".to_string(),
                ),
            },
            ApiError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_unavailable",
                "execution store unavailable".to_string(),
            ),
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "invalid_request", message.clone())
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", message.clone())
            }
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not_found", "not found".to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            error!(code, error = ?self, "Request failed");
        }

        let mut body = json!({ "error": code, "message": message });
        if let ApiError::Submission(SubmissionError::RecordPersistFailure {
            execution_id, ..
        }) = &self
        {
            body["execution_id"] = json!(execution_id);
        }

        (status, Json(body)).into_response()
    }
}
