//! In-memory store for development and tests. State is lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::LifecycleStore;
use crate::error::StoreError;
use crate::lifecycle::{self, Transition, TransitionOutcome};
use crate::types::{ExecutionListFilter, ExecutionRecord, NewExecution};

#[derive(Debug, Default)]
pub struct MemoryLifecycleStore {
    records: DashMap<String, ExecutionRecord>,
}

impl MemoryLifecycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Read-modify-write under the shard lock for `execution_id`
    fn apply(
        &self,
        execution_id: &str,
        transition: &Transition,
        at: DateTime<Utc>,
    ) -> TransitionOutcome {
        let Some(mut current) = self.records.get_mut(execution_id) else {
            return TransitionOutcome::NotFound;
        };

        let outcome = lifecycle::apply(&current, transition, at);
        if let TransitionOutcome::Applied(updated) = &outcome {
            *current = updated.clone();
        }
        outcome
    }
}

#[async_trait]
impl LifecycleStore for MemoryLifecycleStore {
    async fn insert(&self, execution: NewExecution) -> Result<ExecutionRecord, StoreError> {
        match self.records.entry(execution.execution_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                execution_id: execution.execution_id,
            }),
            Entry::Vacant(slot) => {
                let record = ExecutionRecord::submitted(execution);
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.records.get(execution_id).map(|r| r.value().clone()))
    }

    async fn list_for_owner(
        &self,
        owner_id: &str,
        filter: &ExecutionListFilter,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut records: Vec<ExecutionRecord> = self
            .records
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .filter(|r| filter.status.map_or(true, |status| r.status == status))
            .map(|r| r.value().clone())
            .collect();

        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.execution_id.cmp(&a.execution_id))
        });
        records.truncate(filter.effective_limit() as usize);
        Ok(records)
    }

    async fn transition(
        &self,
        execution_id: &str,
        transition: &Transition,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        Ok(self.apply(execution_id, transition, at))
    }
}
