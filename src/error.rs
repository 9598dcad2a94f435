//! Error taxonomy for submission, callback reconciliation, and storage.
//!
//! Every failure a caller can observe maps onto exactly one variant here, so
//! the HTTP layer and the logs can tell a caller mistake apart from an
//! engine outage or a partial failure that needs an operator.

use crate::geometry::GeometryError;

/// Failures from the lifecycle store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record already exists under this execution id
    #[error("execution already recorded: {execution_id}")]
    Duplicate { execution_id: String },

    /// A backend-specific failure (connection, serialization, constraint)
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Failures while rendering or packaging the submission archive
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("template {template} requires field `{field}`, which the descriptor does not provide")]
    TemplateRender { template: String, field: String },

    #[error("template {template} has an unterminated placeholder on line {line}")]
    MalformedTemplate { template: String, line: usize },

    #[error("failed to package archive: {0}")]
    Packaging(#[from] zip::result::ZipError),

    #[error("failed to write archive entry: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the external execution engine
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Connection failure or timeout; the engine never acknowledged the job
    #[error("execution engine unreachable: {message}")]
    Unreachable { message: String },

    /// The engine answered with a non-2xx status
    #[error("execution engine rejected the submission ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// 2xx answer that does not carry a usable execution id
    #[error("execution engine response violates the submission contract: {message}")]
    Protocol { message: String },
}

impl GatewayError {
    /// Protocol errors retry like an outage; a rejection never does
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Unreachable { .. } | GatewayError::Protocol { .. }
        )
    }
}

/// Failures of the submit operation
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("invalid request: {field}: {reason}")]
    InvalidRequest { field: &'static str, reason: String },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The engine accepted the job but no local record tracks it
    #[error("engine accepted job {execution_id} but persisting its record failed: {source}")]
    RecordPersistFailure {
        execution_id: String,
        #[source]
        source: StoreError,
    },
}

impl SubmissionError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        SubmissionError::InvalidRequest {
            field,
            reason: reason.into(),
        }
    }
}

impl From<GeometryError> for SubmissionError {
    fn from(err: GeometryError) -> Self {
        SubmissionError::invalid("geometry", err.to_string())
    }
}

/// Rejections on the webhook path. None of them mutate an existing record.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("unknown execution")]
    UnknownExecution { execution_id: String },

    #[error("invalid callback: {reason}")]
    InvalidCallbackStatus { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ReconcileError::InvalidCallbackStatus {
            reason: reason.into(),
        }
    }
}
