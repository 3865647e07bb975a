//! Idempotency integration tests
//!
//! A redelivered run must reuse committed step results instead of
//! repeating work; only committed results count as done.

use std::sync::atomic::{AtomicUsize, Ordering};

use deskflow::domain::EventType;
use deskflow::{step_key, RunLog, StepError, StepExecutor};
use tempfile::TempDir;
use uuid::Uuid;

async fn executor_env() -> (RunLog, Uuid, Uuid, TempDir) {
    let temp = TempDir::new().unwrap();
    let run_id = Uuid::new_v4();
    let ticket_id = Uuid::new_v4();
    let log = RunLog::open_in(temp.path(), run_id).await.unwrap();
    (log, run_id, ticket_id, temp)
}

#[tokio::test]
async fn test_completed_step_is_not_reinvoked() {
    let (log, run_id, ticket_id, _temp) = executor_env().await;
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let executor = StepExecutor::new(&log, run_id, ticket_id);
        let skills: Vec<String> = executor
            .run("classify", async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec!["postgres".to_string()])
            })
            .await
            .unwrap();

        // Every delivery sees the same memoized value
        assert_eq!(skills, vec!["postgres".to_string()]);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exactly_one_commit_survives_redelivery() {
    let (log, run_id, ticket_id, _temp) = executor_env().await;

    for _ in 0..3 {
        let executor = StepExecutor::new(&log, run_id, ticket_id);
        let _: u32 = executor.run("fetch-ticket", async { Ok(7) }).await.unwrap();
    }

    let key = step_key(run_id, "fetch-ticket");
    let completed = log
        .replay()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.idempotency_key == key && e.event_type == EventType::StepCompleted)
        .count();
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn test_failed_step_runs_again_on_redelivery() {
    let (log, run_id, ticket_id, _temp) = executor_env().await;
    let calls = AtomicUsize::new(0);

    let executor = StepExecutor::new(&log, run_id, ticket_id);
    let first: Result<u32, StepError> = executor
        .run("notify", async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StepError::Retriable(anyhow::anyhow!("mail API unreachable")))
        })
        .await;
    assert!(matches!(first, Err(StepError::Retriable(_))));

    // The failure was not committed; the next delivery executes the step
    let executor = StepExecutor::new(&log, run_id, ticket_id);
    let second: u32 = executor
        .run("notify", async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(9)
        })
        .await
        .unwrap();

    assert_eq!(second, 9);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_non_retriable_error_propagates_unpersisted() {
    let (log, run_id, ticket_id, _temp) = executor_env().await;

    let executor = StepExecutor::new(&log, run_id, ticket_id);
    let result: Result<(), StepError> = executor
        .run("fetch-ticket", async {
            Err(StepError::non_retriable("ticket not found"))
        })
        .await;

    match result {
        Err(StepError::NonRetriable(reason)) => assert_eq!(reason, "ticket not found"),
        other => panic!("expected non-retriable error, got {:?}", other),
    }

    let key = step_key(run_id, "fetch-ticket");
    assert!(!log.is_step_completed(&key).await.unwrap());
}

#[tokio::test]
async fn test_steps_memoize_independently() {
    let (log, run_id, ticket_id, _temp) = executor_env().await;

    let executor = StepExecutor::new(&log, run_id, ticket_id);
    let _: u32 = executor.run("fetch-ticket", async { Ok(1) }).await.unwrap();

    assert!(log
        .is_step_completed(&step_key(run_id, "fetch-ticket"))
        .await
        .unwrap());
    assert!(!log
        .is_step_completed(&step_key(run_id, "classify"))
        .await
        .unwrap());
}
