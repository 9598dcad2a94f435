//! Lifecycle store
//!
//! Durable keyed storage of [`ExecutionRecord`]s. Every status change goes
//! through [`LifecycleStore::transition`], which implementations must run as
//! one atomic conditional write per `execution_id`: of two racing terminal
//! transitions exactly one is `Applied`, the other sees `AlreadyTerminal`.

pub mod memory;
pub mod postgres;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::lifecycle::{Transition, TransitionOutcome};
use crate::types::{ExecutionListFilter, ExecutionRecord, NewExecution};

pub use memory::MemoryLifecycleStore;
pub use postgres::PgLifecycleStore;

#[async_trait]
pub trait LifecycleStore: Send + Sync {
    /// Persist a fresh `submitted` record; an existing id is `Duplicate`
    async fn insert(&self, execution: NewExecution) -> Result<ExecutionRecord, StoreError>;

    /// Unscoped lookup, used by the webhook path
    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Lookup scoped to `owner_id`; another owner's record reads as absent
    async fn get_for_owner(
        &self,
        owner_id: &str,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self
            .get(execution_id)
            .await?
            .filter(|record| record.owner_id == owner_id))
    }

    /// `owner_id`'s records, newest first
    async fn list_for_owner(
        &self,
        owner_id: &str,
        filter: &ExecutionListFilter,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Atomically apply `transition` if the record's current status allows it
    async fn transition(
        &self,
        execution_id: &str,
        transition: &Transition,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError>;
}
