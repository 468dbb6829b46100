use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use task_audit::error::TaskError;
use task_audit::recorder::Execution;
use task_audit::tasks::ProcessData;
use task_audit::worker::{
    Attempt, InFlight, Settlement, Task, TaskRegistry, backoff_secs, classify, settle,
};

#[test]
fn completed_messages_are_archived() {
    let execution = Execution::Completed(());
    assert_eq!(settle(&execution, 1, false), Settlement::Archive);
    assert_eq!(settle(&execution, 3, true), Settlement::Archive);
}

#[test]
fn retryable_failures_are_redelivered_until_the_last_delivery() {
    let execution: Execution<()> = Execution::Failed {
        retryable: true,
        reason: "timeout".to_string(),
    };
    assert_eq!(settle(&execution, 1, false), Settlement::Redeliver(2));
    assert_eq!(settle(&execution, 2, false), Settlement::Redeliver(4));
    assert_eq!(settle(&execution, 3, true), Settlement::Delete);
}

#[test]
fn permanent_failures_are_deleted() {
    let execution: Execution<()> = Execution::Failed {
        retryable: false,
        reason: "bad input".to_string(),
    };
    assert_eq!(settle(&execution, 1, false), Settlement::Delete);
}

#[test]
fn backoff_is_exponential_and_capped() {
    assert_eq!(backoff_secs(0), 2);
    assert_eq!(backoff_secs(1), 2);
    assert_eq!(backoff_secs(3), 8);
    assert_eq!(backoff_secs(9), 512);
    assert_eq!(backoff_secs(10), 600);
    assert_eq!(backoff_secs(50), 600);
}

#[test]
fn registry_rejects_duplicate_kinds() {
    let mut registry = TaskRegistry::new();
    registry.register(Arc::new(ProcessData::default())).unwrap();
    assert!(registry.register(Arc::new(ProcessData::default())).is_err());
    assert_eq!(registry.kinds(), vec!["process_data"]);
    assert!(registry.get("process_data").is_some());
    assert!(registry.get("missing").is_none());
}

#[tokio::test]
async fn process_data_echoes_input() {
    let task = ProcessData::new(Duration::ZERO);
    let out = task.run(&json!({"data": "hello"})).await.unwrap();
    assert_eq!(out, json!({"processed": "hello"}));
}

#[tokio::test]
async fn process_data_fails_permanently_on_error_input() {
    let task = ProcessData::new(Duration::ZERO);
    let err = task.run(&json!({"data": "error"})).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(matches!(err, TaskError::Permanent(_)));

    let err = task.run(&json!({})).await.unwrap_err();
    assert!(matches!(err, TaskError::Permanent(_)));
}

#[test]
fn successful_attempt_passes_through() {
    let out = classify(Attempt::Finished(Ok(7)), 3, true).unwrap();
    assert_eq!(out, 7);
}

#[test]
fn timeout_is_recoverable_before_the_last_delivery() {
    let err = classify::<()>(Attempt::TimedOut(Duration::from_secs(60)), 1, false).unwrap_err();
    assert!(matches!(err, TaskError::Recoverable(ref r) if r.contains("60s")));
    assert!(err.is_retryable());
}

#[test]
fn timeout_on_the_last_delivery_exhausts_retries() {
    let err = classify::<()>(Attempt::TimedOut(Duration::from_secs(60)), 3, true).unwrap_err();
    assert!(matches!(err, TaskError::RetriesExhausted { attempts: 3, .. }));
    assert!(err.is_retryable());
}

#[test]
fn recoverable_failure_on_the_last_delivery_exhausts_retries() {
    let err = classify::<()>(
        Attempt::Finished(Err(TaskError::Recoverable("broker reset".to_string()))),
        3,
        true,
    )
    .unwrap_err();
    match err {
        TaskError::RetriesExhausted { attempts, reason } => {
            assert_eq!(attempts, 3);
            assert_eq!(reason, "broker reset");
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }

    let err = classify::<()>(
        Attempt::Finished(Err(TaskError::Recoverable("broker reset".to_string()))),
        1,
        false,
    )
    .unwrap_err();
    assert!(matches!(err, TaskError::Recoverable(_)));
}

#[test]
fn permanent_failure_stays_permanent_on_the_last_delivery() {
    let err = classify::<()>(
        Attempt::Finished(Err(TaskError::Permanent("bad input".to_string()))),
        3,
        true,
    )
    .unwrap_err();
    assert!(matches!(err, TaskError::Permanent(_)));
}

#[test]
fn unregistered_kind_is_permanent() {
    let err = classify::<()>(Attempt::Unregistered("nope".to_string()), 1, false).unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("nope"));

    let err = classify::<()>(Attempt::Unregistered("nope".to_string()), 3, true).unwrap_err();
    assert!(matches!(err, TaskError::Permanent(_)));
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_deliveries() {
    let in_flight = InFlight::new();
    in_flight.wait_idle().await;

    let guard = in_flight.enter();
    assert_eq!(in_flight.len(), 1);

    let handler = tokio::spawn(async move {
        let _guard = guard;
        tokio::time::sleep(Duration::from_millis(100)).await;
    });

    let waited = tokio::time::timeout(Duration::from_secs(5), in_flight.wait_idle()).await;
    assert!(waited.is_ok());
    assert!(in_flight.is_empty());
    handler.await.unwrap();
}

#[tokio::test]
async fn panicking_delivery_is_still_released() {
    let in_flight = InFlight::new();
    let guard = in_flight.enter();

    let handler = tokio::spawn(async move {
        let _guard = guard;
        panic!("task body blew up");
    });
    assert!(handler.await.is_err());

    tokio::time::timeout(Duration::from_secs(5), in_flight.wait_idle())
        .await
        .unwrap();
    assert_eq!(in_flight.len(), 0);
}
