//! Behaviour every `LifecycleStore` must share. Each check runs against the
//! in-memory store; the Postgres runs need `BMD_DATABASE_URL` and are ignored
//! by default.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use super::*;
use crate::types::{Descriptor, EcosystemType, ExecutionStatus, GeometryType};

/// Concurrent callers per race
const N: usize = 10;

fn new_execution(owner_id: &str) -> NewExecution {
    NewExecution {
        execution_id: format!("wf-{}", Uuid::new_v4()),
        owner_id: owner_id.to_string(),
        descriptor: Descriptor {
            name: "Lynx".to_string(),
            description: Some("range shift".to_string()),
            species_tag: "Lynx lynx".to_string(),
            ecosystem_type: EcosystemType::Terrestrial,
            geometry_type: GeometryType::Rectangle,
            geometry_wkt: "POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))".to_string(),
            time_window: None,
            parameters: Default::default(),
        },
        created_at: Utc::now(),
    }
}

fn completed(n: u64) -> Transition {
    Transition::Completed {
        results: json!({ "species_count": n }),
    }
}

fn failed(message: &str) -> Transition {
    Transition::Failed {
        error_message: message.to_string(),
    }
}

/* ===================== Conformance Checks ===================== */

async fn insert_then_get<S: LifecycleStore>(store: &S) {
    let execution = new_execution("owner-a");
    let id = execution.execution_id.clone();

    let inserted = store.insert(execution.clone()).await.unwrap();
    assert_eq!(inserted.status, ExecutionStatus::Submitted);
    assert_eq!(inserted.results, None);
    assert_eq!(inserted.completed_at, None);

    let fetched = store.get(&id).await.unwrap().expect("record should exist");
    assert_eq!(fetched.execution_id, id);
    assert_eq!(fetched.descriptor, execution.descriptor);
    assert_eq!(fetched.owner_id, "owner-a");
}

async fn duplicate_insert_is_rejected<S: LifecycleStore>(store: &S) {
    let execution = new_execution("owner-a");
    store.insert(execution.clone()).await.unwrap();

    let mut again = execution.clone();
    again.owner_id = "owner-b".to_string();
    match store.insert(again).await {
        Err(StoreError::Duplicate { execution_id }) => {
            assert_eq!(execution_id, execution.execution_id)
        }
        other => panic!("Expected Duplicate, got {:?}", other),
    }

    let kept = store.get(&execution.execution_id).await.unwrap().unwrap();
    assert_eq!(kept.owner_id, "owner-a");
}

async fn reads_are_owner_scoped<S: LifecycleStore>(store: &S) {
    let owner = format!("owner-{}", Uuid::new_v4());
    let other = format!("owner-{}", Uuid::new_v4());
    let execution = new_execution(&owner);
    let id = execution.execution_id.clone();
    store.insert(execution).await.unwrap();

    assert!(store.get_for_owner(&owner, &id).await.unwrap().is_some());
    assert!(store.get_for_owner(&other, &id).await.unwrap().is_none());
    assert!(store
        .list_for_owner(&other, &ExecutionListFilter::default())
        .await
        .unwrap()
        .is_empty());
}

async fn list_is_newest_first_and_filtered<S: LifecycleStore>(store: &S) {
    let owner = format!("owner-{}", Uuid::new_v4());
    let base = Utc::now() - Duration::hours(1);

    let mut ids = Vec::new();
    for minutes in 0..3 {
        let mut execution = new_execution(&owner);
        execution.created_at = base + Duration::minutes(minutes);
        ids.push(execution.execution_id.clone());
        store.insert(execution).await.unwrap();
    }
    store.transition(&ids[1], &completed(1), Utc::now()).await.unwrap();

    let all = store
        .list_for_owner(&owner, &ExecutionListFilter::default())
        .await
        .unwrap();
    let listed: Vec<&str> = all.iter().map(|r| r.execution_id.as_str()).collect();
    assert_eq!(listed, vec![ids[2].as_str(), ids[1].as_str(), ids[0].as_str()]);

    let done = store
        .list_for_owner(
            &owner,
            &ExecutionListFilter {
                status: Some(ExecutionStatus::Completed),
                limit: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].execution_id, ids[1]);

    let limited = store
        .list_for_owner(
            &owner,
            &ExecutionListFilter {
                status: None,
                limit: Some(2),
            },
        )
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
}

async fn terminal_transition_is_absorbing<S: LifecycleStore>(store: &S) {
    let execution = new_execution("owner-a");
    let id = execution.execution_id.clone();
    store.insert(execution).await.unwrap();

    let first = store.transition(&id, &completed(42), Utc::now()).await.unwrap();
    let record = match first {
        TransitionOutcome::Applied(record) => record,
        other => panic!("Expected Applied, got {:?}", other),
    };
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.results, Some(json!({"species_count": 42})));
    assert!(record.completed_at.is_some());

    for transition in [completed(7), failed("late"), Transition::Running] {
        match store.transition(&id, &transition, Utc::now()).await.unwrap() {
            TransitionOutcome::AlreadyTerminal(current) => {
                assert_eq!(current.status, ExecutionStatus::Completed);
                assert_eq!(current.results, record.results);
                assert_eq!(current.error_message, None);
                assert_eq!(current.completed_at, record.completed_at);
            }
            other => panic!("Expected AlreadyTerminal, got {:?}", other),
        }
    }
}

async fn running_then_failed<S: LifecycleStore>(store: &S) {
    let execution = new_execution("owner-a");
    let id = execution.execution_id.clone();
    store.insert(execution).await.unwrap();

    assert!(matches!(
        store.transition(&id, &Transition::Running, Utc::now()).await.unwrap(),
        TransitionOutcome::Applied(ref r)
            if r.status == ExecutionStatus::Running && r.completed_at.is_none()
    ));
    assert!(matches!(
        store.transition(&id, &Transition::Running, Utc::now()).await.unwrap(),
        TransitionOutcome::Unchanged(ref r) if r.status == ExecutionStatus::Running
    ));

    match store.transition(&id, &failed("out of memory"), Utc::now()).await.unwrap() {
        TransitionOutcome::Applied(record) => {
            assert_eq!(record.status, ExecutionStatus::Failed);
            assert_eq!(record.error_message.as_deref(), Some("out of memory"));
            assert_eq!(record.results, None);
            assert!(record.completed_at.is_some());
        }
        other => panic!("Expected Applied, got {:?}", other),
    }
}

async fn unknown_id_is_not_found<S: LifecycleStore>(store: &S) {
    let id = format!("missing-{}", Uuid::new_v4());
    assert_eq!(
        store.transition(&id, &completed(1), Utc::now()).await.unwrap(),
        TransitionOutcome::NotFound
    );
    assert!(store.get(&id).await.unwrap().is_none());
}

/// N callers race conflicting terminal transitions on one record
async fn concurrent_terminal_transitions_exactly_one_wins<S: LifecycleStore + 'static>(
    store: Arc<S>,
) {
    let execution = new_execution("owner-a");
    let id = execution.execution_id.clone();
    store.insert(execution).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..N {
        let store = store.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            let transition = if i % 2 == 0 {
                completed(i as u64)
            } else {
                failed(&format!("worker {} failed", i))
            };
            store.transition(&id, &transition, Utc::now()).await
        }));
    }

    let mut applied = Vec::new();
    let mut already_terminal = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            TransitionOutcome::Applied(record) => applied.push(record),
            TransitionOutcome::AlreadyTerminal(_) => already_terminal += 1,
            other => panic!("Unexpected outcome {:?}", other),
        }
    }

    assert_eq!(applied.len(), 1, "exactly one transition must win");
    assert_eq!(already_terminal, N - 1);

    let winner = &applied[0];
    let stored = store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, winner.status);
    assert_eq!(stored.results, winner.results);
    assert_eq!(stored.error_message, winner.error_message);
    match stored.status {
        ExecutionStatus::Completed => {
            assert!(stored.results.is_some() && stored.error_message.is_none())
        }
        ExecutionStatus::Failed => {
            assert!(stored.results.is_none() && stored.error_message.is_some())
        }
        other => panic!("Record left non-terminal: {}", other),
    }
}

/// A heartbeat racing a terminal callback never downgrades the outcome
async fn heartbeat_racing_completion<S: LifecycleStore + 'static>(store: Arc<S>) {
    let execution = new_execution("owner-a");
    let id = execution.execution_id.clone();
    store.insert(execution).await.unwrap();

    let heartbeat = {
        let store = store.clone();
        let id = id.clone();
        tokio::spawn(async move { store.transition(&id, &Transition::Running, Utc::now()).await })
    };
    let completion = {
        let store = store.clone();
        let id = id.clone();
        tokio::spawn(async move { store.transition(&id, &completed(42), Utc::now()).await })
    };

    heartbeat.await.unwrap().unwrap();
    let completion = completion.await.unwrap().unwrap();
    assert!(matches!(completion, TransitionOutcome::Applied(_)));

    let stored = store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    assert_eq!(stored.results, Some(json!({"species_count": 42})));
}

/* ===================== In-memory Store ===================== */

#[tokio::test]
async fn test_memory_insert_then_get() {
    insert_then_get(&MemoryLifecycleStore::new()).await;
}

#[tokio::test]
async fn test_memory_duplicate_insert() {
    duplicate_insert_is_rejected(&MemoryLifecycleStore::new()).await;
}

#[tokio::test]
async fn test_memory_owner_scoping() {
    reads_are_owner_scoped(&MemoryLifecycleStore::new()).await;
}

#[tokio::test]
async fn test_memory_listing() {
    list_is_newest_first_and_filtered(&MemoryLifecycleStore::new()).await;
}

#[tokio::test]
async fn test_memory_terminal_absorbing() {
    terminal_transition_is_absorbing(&MemoryLifecycleStore::new()).await;
}

#[tokio::test]
async fn test_memory_running_then_failed() {
    running_then_failed(&MemoryLifecycleStore::new()).await;
}

#[tokio::test]
async fn test_memory_unknown_id() {
    let store = MemoryLifecycleStore::new();
    unknown_id_is_not_found(&store).await;
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_concurrent_exactly_one_wins() {
    for _ in 0..20 {
        concurrent_terminal_transitions_exactly_one_wins(Arc::new(MemoryLifecycleStore::new()))
            .await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_heartbeat_race() {
    for _ in 0..20 {
        heartbeat_racing_completion(Arc::new(MemoryLifecycleStore::new())).await;
    }
}

/* ===================== Postgres Store ===================== */

async fn pg_store() -> PgLifecycleStore {
    let url = std::env::var("BMD_DATABASE_URL").expect("BMD_DATABASE_URL must be set");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(N as u32 + 2)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    crate::db::migrate(&pool).await.expect("Failed to run migrations");
    PgLifecycleStore::new(pool)
}

#[tokio::test]
#[ignore]
async fn test_pg_insert_then_get() {
    insert_then_get(&pg_store().await).await;
}

#[tokio::test]
#[ignore]
async fn test_pg_duplicate_insert() {
    duplicate_insert_is_rejected(&pg_store().await).await;
}

#[tokio::test]
#[ignore]
async fn test_pg_owner_scoping() {
    reads_are_owner_scoped(&pg_store().await).await;
}

#[tokio::test]
#[ignore]
async fn test_pg_listing() {
    list_is_newest_first_and_filtered(&pg_store().await).await;
}

#[tokio::test]
#[ignore]
async fn test_pg_terminal_absorbing() {
    terminal_transition_is_absorbing(&pg_store().await).await;
}

#[tokio::test]
#[ignore]
async fn test_pg_running_then_failed() {
    running_then_failed(&pg_store().await).await;
}

#[tokio::test]
#[ignore]
async fn test_pg_unknown_id() {
    unknown_id_is_not_found(&pg_store().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_concurrent_exactly_one_wins() {
    concurrent_terminal_transitions_exactly_one_wins(Arc::new(pg_store().await)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_heartbeat_race() {
    heartbeat_racing_completion(Arc::new(pg_store().await)).await;
}
