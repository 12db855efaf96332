mod common;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::{file_pool, setup_pool, RecordingRemote};
use offline_sync::connectivity::{ConnectivityMonitor, ConnectivityState};
use offline_sync::db::{self, Pool};
use offline_sync::executor::MutationExecutor;
use offline_sync::model::{MutationStatus, NewMutation, Operation};
use offline_sync::remote::RemoteDataLayer;
use offline_sync::sync::{PassOutcome, SyncEvent, SyncOrchestrator, SyncState};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

async fn enqueue(pool: &Pool, resource: &str, op: Operation, payload: Value) -> String {
    db::enqueue_mutation(pool, &NewMutation::new(resource, op, payload))
        .await
        .unwrap()
        .id
}

fn completed(outcome: PassOutcome) -> offline_sync::sync::SyncReport {
    match outcome {
        PassOutcome::Completed(report) => report,
        other => panic!("expected completed pass, got {other:?}"),
    }
}

#[tokio::test]
async fn replay_follows_enqueue_order() {
    let pool = setup_pool().await;
    enqueue(&pool, "campaigns", Operation::Create, json!({ "id": "c1", "name": "A" })).await;
    enqueue(&pool, "campaigns", Operation::Update, json!({ "id": "c1", "name": "B" })).await;
    enqueue(&pool, "tasks", Operation::Create, json!({ "title": "t" })).await;
    enqueue(&pool, "campaigns", Operation::Delete, json!({ "id": "c1" })).await;

    let remote = RecordingRemote::default();
    let orchestrator = SyncOrchestrator::new(pool.clone(), remote.executor());
    let report = completed(orchestrator.run_pass().await);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 0);

    let calls = remote.calls().await;
    let seen: Vec<(&str, &str)> = calls
        .iter()
        .map(|c| (c.verb, c.resource.as_str()))
        .collect();
    assert_eq!(
        seen,
        vec![
            ("insert", "campaigns"),
            ("update", "campaigns"),
            ("insert", "tasks"),
            ("delete", "campaigns"),
        ]
    );
    assert_eq!(calls[1].key, Some(json!("c1")));
    assert_eq!(calls[1].body, json!({ "name": "B" }));
    assert_eq!(db::count_mutations(&pool).await.unwrap(), 0);
    assert_eq!(orchestrator.state(), SyncState::Idle);
}

#[tokio::test]
async fn mid_queue_failure_does_not_block_later_items() {
    let pool = setup_pool().await;
    let first = enqueue(&pool, "tasks", Operation::Create, json!({ "title": "1" })).await;
    let second = enqueue(&pool, "tasks", Operation::Create, json!({ "title": "2" })).await;
    let third = enqueue(&pool, "tasks", Operation::Create, json!({ "title": "3" })).await;

    let remote = RecordingRemote::with_responses(vec![
        Ok(json!({ "id": 1 })),
        Err(anyhow!("violates check constraint")),
        Ok(json!({ "id": 3 })),
    ]);
    let orchestrator = SyncOrchestrator::new(pool.clone(), remote.executor());
    let report = completed(orchestrator.run_pass().await);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failed_ids, vec![second.clone()]);
    assert_eq!(remote.calls().await.len(), 3);

    assert!(db::get_mutation(&pool, &first).await.unwrap().is_none());
    assert!(db::get_mutation(&pool, &third).await.unwrap().is_none());
    let failed = db::get_mutation(&pool, &second).await.unwrap().unwrap();
    assert_eq!(failed.status, MutationStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert!(failed
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("check constraint")));
}

#[tokio::test]
async fn failed_items_are_retried_by_the_next_pass() {
    let pool = setup_pool().await;
    let id = enqueue(&pool, "tasks", Operation::Delete, json!({ "id": 9 })).await;

    let remote = RecordingRemote::with_responses(vec![
        Err(anyhow!("503 service unavailable")),
        Err(anyhow!("503 service unavailable")),
    ]);
    let orchestrator = SyncOrchestrator::new(pool.clone(), remote.executor());

    completed(orchestrator.run_pass().await);
    completed(orchestrator.run_pass().await);
    let rec = db::get_mutation(&pool, &id).await.unwrap().unwrap();
    assert_eq!(rec.status, MutationStatus::Failed);
    assert_eq!(rec.retry_count, 2);

    let report = completed(orchestrator.run_pass().await);
    assert_eq!(report.succeeded, 1);
    assert!(db::get_mutation(&pool, &id).await.unwrap().is_none());
    assert_eq!(remote.calls().await.len(), 3);
}

#[tokio::test]
async fn malformed_payload_is_marked_failed_not_thrown() {
    let pool = setup_pool().await;
    let id = enqueue(&pool, "tasks", Operation::Update, json!({ "done": true })).await;
    let ok = enqueue(&pool, "tasks", Operation::Create, json!({ "title": "x" })).await;

    let remote = RecordingRemote::default();
    let orchestrator = SyncOrchestrator::new(pool.clone(), remote.executor());
    let report = completed(orchestrator.run_pass().await);
    assert_eq!(report.failed_ids, vec![id.clone()]);
    assert!(db::get_mutation(&pool, &ok).await.unwrap().is_none());

    let rec = db::get_mutation(&pool, &id).await.unwrap().unwrap();
    assert!(rec.last_error.unwrap().contains("missing key field"));
    assert_eq!(remote.calls().await.len(), 1);
}

#[tokio::test]
async fn concurrent_triggers_run_a_single_pass() {
    let pool = setup_pool().await;
    for n in 0..3 {
        enqueue(&pool, "tasks", Operation::Create, json!({ "n": n })).await;
    }

    let remote = RecordingRemote::default().with_delay(Duration::from_millis(20));
    let orchestrator = SyncOrchestrator::new(pool.clone(), remote.executor());

    let (a, b) = futures::join!(orchestrator.run_pass(), orchestrator.run_pass());
    let outcomes = [a, b];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, PassOutcome::Skipped))
            .count(),
        1
    );
    assert_eq!(remote.calls().await.len(), 3);
    assert_eq!(db::count_mutations(&pool).await.unwrap(), 0);
    assert!(!orchestrator.is_syncing());
}

#[tokio::test]
async fn rapid_reconnects_never_double_apply() {
    let pool = setup_pool().await;
    enqueue(&pool, "campaigns", Operation::Create, json!({ "name": "a" })).await;
    enqueue(&pool, "campaigns", Operation::Create, json!({ "name": "b" })).await;

    let remote = RecordingRemote::default().with_delay(Duration::from_millis(10));
    let orchestrator = Arc::new(SyncOrchestrator::new(pool.clone(), remote.executor()));
    let monitor = ConnectivityMonitor::new(ConnectivityState::Offline);
    orchestrator.attach(&monitor);
    let mut events = orchestrator.subscribe();

    monitor.report(ConnectivityState::Online);
    monitor.report(ConnectivityState::Offline);
    monitor.report(ConnectivityState::Online);

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event,
        SyncEvent::Completed { .. } | SyncEvent::NothingToDo
    ));

    // Let any second trigger settle before counting calls.
    while orchestrator.is_syncing() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(remote.calls().await.len(), 2);
    assert_eq!(db::count_mutations(&pool).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnect_reported_from_a_plain_thread_still_replays() {
    let pool = setup_pool().await;
    enqueue(&pool, "campaigns", Operation::Create, json!({ "name": "a" })).await;

    let remote = RecordingRemote::default();
    let orchestrator = Arc::new(SyncOrchestrator::new(pool.clone(), remote.executor()));
    let monitor = Arc::new(ConnectivityMonitor::new(ConnectivityState::Offline));
    orchestrator.attach(&monitor);
    let mut events = orchestrator.subscribe();

    let reporter = Arc::clone(&monitor);
    std::thread::spawn(move || reporter.report(ConnectivityState::Online))
        .join()
        .unwrap();

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        SyncEvent::Completed {
            succeeded: 1,
            failed: 0
        }
    );
    assert_eq!(remote.calls().await.len(), 1);
    assert_eq!(db::count_mutations(&pool).await.unwrap(), 0);
}

/// Remote that enqueues one more mutation while the first call is in flight.
struct EnqueueDuringPass {
    pool: Pool,
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteDataLayer for EnqueueDuringPass {
    async fn insert(&self, _resource: &str, payload: &Value) -> Result<Value> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            db::enqueue_mutation(
                &self.pool,
                &NewMutation::new("tasks", Operation::Create, json!({ "late": true })),
            )
            .await?;
        }
        Ok(payload.clone())
    }

    async fn update(&self, _resource: &str, _key: &Value, changes: &Value) -> Result<Value> {
        Ok(changes.clone())
    }

    async fn delete(&self, _resource: &str, key: &Value) -> Result<Value> {
        Ok(json!({ "id": key }))
    }
}

#[tokio::test]
async fn mutations_enqueued_mid_pass_wait_for_the_next_pass() {
    let pool = setup_pool().await;
    enqueue(&pool, "tasks", Operation::Create, json!({ "early": true })).await;

    let remote = Arc::new(EnqueueDuringPass {
        pool: pool.clone(),
        calls: AtomicUsize::new(0),
    });
    let orchestrator =
        SyncOrchestrator::new(pool.clone(), MutationExecutor::new(remote.clone(), "id"));

    let report = completed(orchestrator.run_pass().await);
    assert_eq!(report.attempted(), 1);
    let left = db::list_mutations(&pool).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].payload, json!({ "late": true }));
    assert_eq!(left[0].status, MutationStatus::Pending);

    let report = completed(orchestrator.run_pass().await);
    assert_eq!(report.succeeded, 1);
    assert_eq!(db::count_mutations(&pool).await.unwrap(), 0);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
}

/// Remote whose first call takes the queue database down with it.
struct BreaksStorage {
    pool: Pool,
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteDataLayer for BreaksStorage {
    async fn insert(&self, _resource: &str, payload: &Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pool.close().await;
        Ok(payload.clone())
    }

    async fn update(&self, _resource: &str, _key: &Value, changes: &Value) -> Result<Value> {
        Ok(changes.clone())
    }

    async fn delete(&self, _resource: &str, key: &Value) -> Result<Value> {
        Ok(json!({ "id": key }))
    }
}

#[tokio::test]
async fn storage_fault_aborts_the_pass_without_losing_records() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("queue.db");
    let pool = file_pool(&path).await;
    for n in 0..3 {
        enqueue(&pool, "tasks", Operation::Create, json!({ "n": n })).await;
    }

    let remote = Arc::new(BreaksStorage {
        pool: pool.clone(),
        calls: AtomicUsize::new(0),
    });
    let orchestrator =
        SyncOrchestrator::new(pool.clone(), MutationExecutor::new(remote.clone(), "id"));
    let mut events = orchestrator.subscribe();

    let outcome = orchestrator.run_pass().await;
    assert!(matches!(outcome, PassOutcome::Aborted(_)));
    assert!(matches!(events.recv().await.unwrap(), SyncEvent::Aborted { .. }));
    assert_eq!(orchestrator.state(), SyncState::Idle);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

    // Nothing was removed: the applied item stays until a pass can confirm it.
    let reopened = file_pool(&path).await;
    let left = db::list_mutations(&reopened).await.unwrap();
    assert_eq!(left.len(), 3);
    assert!(left.iter().all(|r| r.status == MutationStatus::Pending));
}

#[tokio::test]
async fn empty_queue_reports_nothing_to_do() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let orchestrator = SyncOrchestrator::new(pool, remote.executor());
    let mut events = orchestrator.subscribe();

    assert_eq!(orchestrator.run_pass().await, PassOutcome::NothingToDo);
    assert_eq!(events.recv().await.unwrap(), SyncEvent::NothingToDo);
    assert!(remote.calls().await.is_empty());
}

#[tokio::test]
async fn completion_is_signalled_even_when_items_fail() {
    let pool = setup_pool().await;
    enqueue(&pool, "tasks", Operation::Create, json!({ "n": 1 })).await;
    enqueue(&pool, "tasks", Operation::Create, json!({ "n": 2 })).await;

    let remote = RecordingRemote::failing("permission denied");
    let orchestrator = SyncOrchestrator::new(pool, remote.executor());
    let mut events = orchestrator.subscribe();

    orchestrator.run_pass().await;
    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent::Completed {
            succeeded: 1,
            failed: 1
        }
    );
}

#[tokio::test]
async fn startup_replays_leftovers_only_when_online() {
    let pool = setup_pool().await;
    enqueue(&pool, "tasks", Operation::Create, json!({ "left": "over" })).await;

    let remote = RecordingRemote::default();
    let orchestrator = SyncOrchestrator::new(pool.clone(), remote.executor());

    let offline = ConnectivityMonitor::new(ConnectivityState::Offline);
    assert!(orchestrator.start(&offline).await.is_none());
    assert_eq!(db::count_mutations(&pool).await.unwrap(), 1);

    let online = ConnectivityMonitor::new(ConnectivityState::Online);
    let report = completed(orchestrator.start(&online).await.unwrap());
    assert_eq!(report.succeeded, 1);
    assert_eq!(db::count_mutations(&pool).await.unwrap(), 0);
}
