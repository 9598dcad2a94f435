//! Callback reconciler
//!
//! Applies the engine's completion webhook to the stored record. Delivery is
//! at-least-once, so a callback for a record that is already terminal is a
//! successful no-op and never overwrites the first result.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::error::ReconcileError;
use crate::lifecycle::{Transition, TransitionOutcome};
use crate::store::LifecycleStore;
use crate::types::{CallbackPayload, ExecutionRecord, ExecutionStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// This callback moved the record into its terminal state
    Applied(ExecutionRecord),
    /// The record was already terminal; it is returned unchanged
    AlreadyTerminal(ExecutionRecord),
}

impl ReconcileOutcome {
    pub fn record(&self) -> &ExecutionRecord {
        match self {
            ReconcileOutcome::Applied(record) | ReconcileOutcome::AlreadyTerminal(record) => record,
        }
    }
}

pub struct CallbackReconciler {
    store: Arc<dyn LifecycleStore>,
}

impl CallbackReconciler {
    pub fn new(store: Arc<dyn LifecycleStore>) -> Self {
        Self { store }
    }

    /// Reconcile a webhook body received on `/webhook/{path_id}`
    pub async fn reconcile_callback(
        &self,
        path_id: &str,
        payload: CallbackPayload,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if payload.workflow_id.trim() != path_id {
            warn!(
                execution_id = %path_id,
                body_workflow_id = %payload.workflow_id,
                "Callback body does not match the webhook path"
            );
            return Err(ReconcileError::invalid(
                "workflow_id in body does not match the webhook path",
            ));
        }

        self.reconcile(
            path_id,
            &payload.status,
            payload.results,
            payload.error_message,
        )
        .await
    }

    pub async fn reconcile(
        &self,
        execution_id: &str,
        reported_status: &str,
        results: Option<JsonValue>,
        error_message: Option<String>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(current) = self.store.get(execution_id).await? else {
            warn!(execution_id = %execution_id, "Callback for unknown execution");
            return Err(ReconcileError::UnknownExecution {
                execution_id: execution_id.to_string(),
            });
        };

        if current.status.is_terminal() {
            info!(
                execution_id = %execution_id,
                status = %current.status,
                "Duplicate callback ignored: execution already terminal"
            );
            return Ok(ReconcileOutcome::AlreadyTerminal(current));
        }

        let transition = terminal_transition(reported_status, results, error_message)?;

        match self
            .store
            .transition(execution_id, &transition, Utc::now())
            .await?
        {
            TransitionOutcome::Applied(record) => {
                info!(
                    execution_id = %execution_id,
                    status = %record.status,
                    "Execution reached terminal state"
                );
                Ok(ReconcileOutcome::Applied(record))
            }
            TransitionOutcome::AlreadyTerminal(record) => {
                info!(
                    execution_id = %execution_id,
                    status = %record.status,
                    "Concurrent callback won the race; execution already terminal"
                );
                Ok(ReconcileOutcome::AlreadyTerminal(record))
            }
            TransitionOutcome::Unchanged(record) => Err(ReconcileError::invalid(format!(
                "cannot move execution from {} to {}",
                record.status,
                transition.target()
            ))),
            TransitionOutcome::NotFound => Err(ReconcileError::UnknownExecution {
                execution_id: execution_id.to_string(),
            }),
        }
    }
}

/// Build the terminal transition a callback asks for
fn terminal_transition(
    reported_status: &str,
    results: Option<JsonValue>,
    error_message: Option<String>,
) -> Result<Transition, ReconcileError> {
    let status: ExecutionStatus = reported_status
        .parse()
        .map_err(|_| ReconcileError::invalid(format!("unsupported status {:?}", reported_status)))?;

    match status {
        ExecutionStatus::Completed => match results {
            Some(results) if !is_empty_payload(&results) => Ok(Transition::Completed { results }),
            _ => Err(ReconcileError::invalid("completed callback requires non-empty results")),
        },
        ExecutionStatus::Failed => match error_message.map(|m| m.trim().to_string()) {
            Some(message) if !message.is_empty() => Ok(Transition::Failed {
                error_message: message,
            }),
            _ => Err(ReconcileError::invalid("failed callback requires an error_message")),
        },
        other => Err(ReconcileError::invalid(format!(
            "callbacks must report completed or failed, got {}",
            other
        ))),
    }
}

fn is_empty_payload(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLifecycleStore;
    use crate::types::{Descriptor, EcosystemType, GeometryType, NewExecution};
    use serde_json::json;

    async fn store_with(execution_id: &str) -> Arc<MemoryLifecycleStore> {
        let store = Arc::new(MemoryLifecycleStore::new());
        store
            .insert(NewExecution {
                execution_id: execution_id.to_string(),
                owner_id: "user-1".to_string(),
                descriptor: Descriptor {
                    name: "Lynx".to_string(),
                    description: None,
                    species_tag: "Lynx lynx".to_string(),
                    ecosystem_type: EcosystemType::Terrestrial,
                    geometry_type: GeometryType::Rectangle,
                    geometry_wkt: "POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))".to_string(),
                    time_window: None,
                    parameters: Default::default(),
                },
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
    }

    fn completed_payload(id: &str, count: u64) -> CallbackPayload {
        CallbackPayload {
            workflow_id: id.to_string(),
            status: "completed".to_string(),
            results: Some(json!({ "species_count": count })),
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_unknown_execution_creates_nothing() {
        let store = Arc::new(MemoryLifecycleStore::new());
        let reconciler = CallbackReconciler::new(store.clone());

        let err = reconciler
            .reconcile_callback("ghost", completed_payload("ghost", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownExecution { .. }));
        assert_eq!(err.to_string(), "unknown execution");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_completion_then_duplicate_is_idempotent() {
        let store = store_with("wf-1").await;
        let reconciler = CallbackReconciler::new(store.clone());

        let first = reconciler
            .reconcile_callback("wf-1", completed_payload("wf-1", 42))
            .await
            .unwrap();
        let applied = match first {
            ReconcileOutcome::Applied(record) => record,
            other => panic!("Expected Applied, got {:?}", other),
        };
        assert_eq!(applied.results, Some(json!({"species_count": 42})));
        assert!(applied.completed_at.is_some());

        let replay = reconciler
            .reconcile_callback("wf-1", completed_payload("wf-1", 42))
            .await
            .unwrap();
        assert_eq!(replay, ReconcileOutcome::AlreadyTerminal(applied.clone()));

        // A later conflicting outcome does not overwrite the first
        let conflicting = reconciler
            .reconcile(
                "wf-1",
                "failed",
                None,
                Some("engine crashed".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(conflicting.record(), &applied);
        assert_eq!(store.get("wf-1").await.unwrap().unwrap(), applied);
    }

    #[tokio::test]
    async fn test_failure_callback() {
        let store = store_with("wf-2").await;
        let reconciler = CallbackReconciler::new(store);

        let outcome = reconciler
            .reconcile("wf-2", "failed", Some(json!({"partial": true})), Some(" OOM ".to_string()))
            .await
            .unwrap();
        let record = outcome.record();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("OOM"));
        assert_eq!(record.results, None);
    }

    #[tokio::test]
    async fn test_invalid_callbacks_leave_record_untouched() {
        let store = store_with("wf-3").await;
        let reconciler = CallbackReconciler::new(store.clone());
        let before = store.get("wf-3").await.unwrap().unwrap();

        let cases: Vec<(&str, Option<JsonValue>, Option<String>)> = vec![
            ("completed", None, None),
            ("completed", Some(json!({})), None),
            ("completed", Some(JsonValue::Null), None),
            ("failed", None, Some("   ".to_string())),
            ("failed", Some(json!({"species_count": 1})), None),
            ("running", None, None),
            ("submitted", None, None),
            ("cancelled", None, Some("stopped".to_string())),
        ];

        for (status, results, error_message) in cases {
            let err = reconciler
                .reconcile("wf-3", status, results, error_message)
                .await
                .unwrap_err();
            assert!(
                matches!(err, ReconcileError::InvalidCallbackStatus { .. }),
                "status {} should be rejected, got {:?}",
                status,
                err
            );
        }

        assert_eq!(store.get("wf-3").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_path_and_body_ids_must_match() {
        let store = store_with("wf-4").await;
        let reconciler = CallbackReconciler::new(store.clone());

        let err = reconciler
            .reconcile_callback("wf-4", completed_payload("wf-other", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidCallbackStatus { .. }));
        assert_eq!(
            store.get("wf-4").await.unwrap().unwrap().status,
            ExecutionStatus::Submitted
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_conflicting_callbacks_one_wins() {
        for round in 0..20 {
            let id = format!("wf-race-{}", round);
            let store = store_with(&id).await;
            let reconciler = Arc::new(CallbackReconciler::new(store.clone()));

            let completion = {
                let reconciler = reconciler.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    reconciler
                        .reconcile(&id, "completed", Some(json!({"species_count": 42})), None)
                        .await
                })
            };
            let failure = {
                let reconciler = reconciler.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    reconciler
                        .reconcile(&id, "failed", None, Some("boom".to_string()))
                        .await
                })
            };

            let outcomes = [
                completion.await.unwrap().unwrap(),
                failure.await.unwrap().unwrap(),
            ];
            let applied = outcomes
                .iter()
                .filter(|o| matches!(o, ReconcileOutcome::Applied(_)))
                .count();
            assert_eq!(applied, 1);

            let stored = store.get(&id).await.unwrap().unwrap();
            assert!(stored.results.is_some() != stored.error_message.is_some());
            assert!(stored.status.is_terminal());
        }
    }
}
