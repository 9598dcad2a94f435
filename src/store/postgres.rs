//! Postgres-backed lifecycle store
//!
//! Transitions are single conditional `UPDATE ... RETURNING` statements, so
//! concurrent callbacks serialise on the row lock and only one can match the
//! non-terminal predicate. A zero-row update is followed by a read to tell
//! the caller why nothing changed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::LifecycleStore;
use crate::error::StoreError;
use crate::lifecycle::{Transition, TransitionOutcome};
use crate::types::{Descriptor, ExecutionListFilter, ExecutionRecord, ExecutionStatus, NewExecution};

const COLUMNS: &str = "execution_id, owner_id, descriptor, status, results, error_message, \
                       created_at, updated_at, completed_at";

#[derive(Debug, Clone)]
pub struct PgLifecycleStore {
    pool: PgPool,
}

impl PgLifecycleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Classify a transition that matched no row
    async fn classify_miss(&self, execution_id: &str) -> Result<TransitionOutcome, StoreError> {
        Ok(match self.get(execution_id).await? {
            None => TransitionOutcome::NotFound,
            Some(record) if record.status.is_terminal() => {
                TransitionOutcome::AlreadyTerminal(record)
            }
            Some(record) => TransitionOutcome::Unchanged(record),
        })
    }
}

fn record_from_row(row: &PgRow) -> Result<ExecutionRecord, StoreError> {
    let descriptor: Json<Descriptor> = row.try_get("descriptor")?;
    Ok(ExecutionRecord {
        execution_id: row.try_get("execution_id")?,
        owner_id: row.try_get("owner_id")?,
        descriptor: descriptor.0,
        status: row.try_get("status")?,
        results: row.try_get("results")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl LifecycleStore for PgLifecycleStore {
    async fn insert(&self, execution: NewExecution) -> Result<ExecutionRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO executions (execution_id, owner_id, descriptor, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (execution_id) DO NOTHING
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(&execution.execution_id)
        .bind(&execution.owner_id)
        .bind(Json(&execution.descriptor))
        .bind(ExecutionStatus::Submitted)
        .bind(execution.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(StoreError::Duplicate {
                execution_id: execution.execution_id,
            }),
        }
    }

    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE execution_id = $1",
            COLUMNS
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_for_owner(
        &self,
        owner_id: &str,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE execution_id = $1 AND owner_id = $2",
            COLUMNS
        ))
        .bind(execution_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_for_owner(
        &self,
        owner_id: &str,
        filter: &ExecutionListFilter,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM executions
            WHERE owner_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, execution_id DESC
            LIMIT $3
            "#,
            COLUMNS
        ))
        .bind(owner_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.effective_limit())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn transition(
        &self,
        execution_id: &str,
        transition: &Transition,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        let row = match transition {
            Transition::Running => {
                sqlx::query(&format!(
                    r#"
                    UPDATE executions
                    SET status = 'running',
                        updated_at = $2
                    WHERE execution_id = $1
                      AND status = 'submitted'
                    RETURNING {}
                    "#,
                    COLUMNS
                ))
                .bind(execution_id)
                .bind(at)
                .fetch_optional(&self.pool)
                .await?
            }
            Transition::Completed { .. } | Transition::Failed { .. } => {
                let (results, error_message): (Option<JsonValue>, Option<String>) =
                    match transition {
                        Transition::Completed { results } => (Some(results.clone()), None),
                        Transition::Failed { error_message } => {
                            (None, Some(error_message.clone()))
                        }
                        Transition::Running => (None, None),
                    };

                sqlx::query(&format!(
                    r#"
                    UPDATE executions
                    SET status = $2,
                        results = $3,
                        error_message = $4,
                        updated_at = $5,
                        completed_at = $5
                    WHERE execution_id = $1
                      AND status NOT IN ('completed', 'failed')
                    RETURNING {}
                    "#,
                    COLUMNS
                ))
                .bind(execution_id)
                .bind(transition.target())
                .bind(results)
                .bind(error_message)
                .bind(at)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match row {
            Some(row) => Ok(TransitionOutcome::Applied(record_from_row(&row)?)),
            None => self.classify_miss(execution_id).await,
        }
    }
}
