//! Execution lifecycle state machine
//!
//! ```text
//! submitted ──► running ──► completed | failed
//!     └──────────────────────► completed | failed
//! ```
//!
//! Terminal states are absorbing. Stores apply a [`Transition`] as a single
//! conditional update and report the result as a [`TransitionOutcome`]; the
//! in-memory store calls [`apply`] directly under its per-key lock.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::types::{ExecutionRecord, ExecutionStatus};

/// A requested status change together with the payload it writes
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Running,
    Completed { results: JsonValue },
    Failed { error_message: String },
}

impl Transition {
    pub fn target(&self) -> ExecutionStatus {
        match self {
            Transition::Running => ExecutionStatus::Running,
            Transition::Completed { .. } => ExecutionStatus::Completed,
            Transition::Failed { .. } => ExecutionStatus::Failed,
        }
    }
}

/// Result of attempting a transition against the stored record
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The transition won and the record now reads as returned
    Applied(ExecutionRecord),
    /// The record was already completed or failed; nothing changed
    AlreadyTerminal(ExecutionRecord),
    /// The transition does not apply to the current non-terminal status
    Unchanged(ExecutionRecord),
    NotFound,
}

/// Whether `from → to` is an edge of the state machine
pub fn is_legal(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    use ExecutionStatus::*;

    matches!(
        (from, to),
        (Submitted, Running) | (Submitted, Completed) | (Submitted, Failed)
            | (Running, Completed)
            | (Running, Failed)
    )
}

/// Apply `transition` to `record` at time `at`
pub fn apply(
    record: &ExecutionRecord,
    transition: &Transition,
    at: DateTime<Utc>,
) -> TransitionOutcome {
    if record.status.is_terminal() {
        return TransitionOutcome::AlreadyTerminal(record.clone());
    }
    if !is_legal(record.status, transition.target()) {
        return TransitionOutcome::Unchanged(record.clone());
    }

    let mut updated = record.clone();
    updated.status = transition.target();
    updated.updated_at = at;

    match transition {
        Transition::Running => {}
        Transition::Completed { results } => {
            updated.results = Some(results.clone());
            updated.error_message = None;
            updated.completed_at = Some(at);
        }
        Transition::Failed { error_message } => {
            updated.results = None;
            updated.error_message = Some(error_message.clone());
            updated.completed_at = Some(at);
        }
    }

    TransitionOutcome::Applied(updated)
}
