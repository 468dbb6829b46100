mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::FlakyStore;
use task_audit::codec::{Arg, Arguments};
use task_audit::error::TaskError;
use task_audit::model::{ExecutionContext, RecordFilter, RecordId, Status};
use task_audit::recorder::{Execution, Recorder};
use task_audit::store::{AuditStore, MemoryStore};

const PARAMS: &[&str] = &["data"];

#[tokio::test]
async fn pending_record_exists_before_work_runs() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new(store.clone());
    let ctx = ExecutionContext::new("h1", "process_data");
    let data = "hello";
    let args = Arguments::new().arg(Arg::value(&data));

    let observed = recorder
        .execute(&ctx, &args, PARAMS, || {
            let store = store.clone();
            async move {
                let records = store.list(&RecordFilter::default()).await.unwrap();
                Ok::<_, TaskError>(records)
            }
        })
        .await
        .unwrap()
        .into_value()
        .unwrap();

    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].status, Status::Pending);
    assert!(!observed[0].completed);
    assert_eq!(observed[0].task_handle.as_str(), "h1");
}

#[tokio::test]
async fn successful_work_is_marked_completed() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new(store.clone());
    let ctx = ExecutionContext::new("h1", "process_data");
    let data = "ok";
    let args = Arguments::new().kwarg("data", Arg::value(&data));

    let execution = recorder
        .execute(&ctx, &args, PARAMS, || async {
            Ok::<_, TaskError>(format!("processed {data}"))
        })
        .await
        .unwrap();
    assert_eq!(execution, Execution::Completed("processed ok".to_string()));

    let record = store.get(RecordId(1)).await.unwrap();
    assert_eq!(record.status, Status::Completed);
    assert!(record.completed);
    assert!(!record.retryable);
    assert!(record.remarks.is_empty());
    assert_eq!(record.request_payload, r#"{"data":"ok"}"#);
    assert_eq!(record.correlation_id, ctx.correlation_id);
}

#[tokio::test]
async fn application_failure_is_not_retryable() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new(store.clone());
    let ctx = ExecutionContext::new("h2", "process_data");
    let data = "error";
    let args = Arguments::new().arg(Arg::value(&data));

    let execution = recorder
        .execute(&ctx, &args, PARAMS, || async {
            Err::<(), _>(TaskError::Permanent("cannot process data: error".to_string()))
        })
        .await
        .unwrap();
    assert_eq!(
        execution,
        Execution::Failed {
            retryable: false,
            reason: "cannot process data: error".to_string()
        }
    );

    let record = store.get(RecordId(1)).await.unwrap();
    assert_eq!(record.status, Status::Failed);
    assert!(!record.completed);
    assert!(!record.retryable);
    assert_eq!(record.remarks, "cannot process data: error");
    assert_eq!(record.request_payload, r#"{"data":"error"}"#);
}

#[tokio::test]
async fn recoverable_failure_is_flagged_for_reconciliation() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new(store.clone());
    let ctx = ExecutionContext::new("h4", "process_data");

    let execution = recorder
        .execute(&ctx, &Arguments::new(), PARAMS, || async {
            Err::<(), _>(TaskError::RetriesExhausted {
                attempts: 3,
                reason: "broker connection reset".to_string(),
            })
        })
        .await
        .unwrap();
    assert!(matches!(execution, Execution::Failed { retryable: true, .. }));

    let record = store.get(RecordId(1)).await.unwrap();
    assert_eq!(record.status, Status::Failed);
    assert!(record.retryable);
    assert!(record.remarks.contains("broker connection reset"));
    assert!(record.is_reconcilable());
}

#[tokio::test]
async fn empty_failure_message_still_leaves_remarks() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new(store.clone());
    let ctx = ExecutionContext::new("h5", "process_data");

    recorder
        .execute(&ctx, &Arguments::new(), PARAMS, || async {
            Err::<(), _>(TaskError::Permanent(String::new()))
        })
        .await
        .unwrap();

    let record = store.get(RecordId(1)).await.unwrap();
    assert!(!record.remarks.is_empty());
}

#[tokio::test]
async fn work_does_not_run_when_pending_write_fails() {
    let store = Arc::new(FlakyStore::new());
    store.fail_create.store(true, Ordering::SeqCst);
    let recorder = Recorder::new(store.clone());
    let ctx = ExecutionContext::new("h6", "process_data");
    let ran = AtomicBool::new(false);

    let result = recorder
        .execute(&ctx, &Arguments::new(), PARAMS, || async {
            ran.store(true, Ordering::SeqCst);
            Ok::<_, TaskError>(())
        })
        .await;

    assert!(result.is_err());
    assert!(!ran.load(Ordering::SeqCst));
    assert!(store.inner.is_empty());
}

#[tokio::test]
async fn terminal_write_failure_does_not_change_the_outcome() {
    let store = Arc::new(FlakyStore::new());
    store.fail_update.store(true, Ordering::SeqCst);
    let recorder = Recorder::new(store.clone());
    let ctx = ExecutionContext::new("h7", "process_data");

    let execution = recorder
        .execute(&ctx, &Arguments::new(), PARAMS, || async { Ok::<_, TaskError>(42) })
        .await
        .unwrap();
    assert_eq!(execution, Execution::Completed(42));

    // The record stays pending for the monitor to repair.
    let record = store.get(RecordId(1)).await.unwrap();
    assert_eq!(record.status, Status::Pending);
}

#[tokio::test]
async fn each_attempt_gets_its_own_record() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new(store.clone());
    let first = ExecutionContext::new("h8", "process_data");
    let second = ExecutionContext::new("h9", "process_data").with_correlation(first.correlation_id);

    for ctx in [&first, &second] {
        recorder
            .execute(ctx, &Arguments::new(), PARAMS, || async { Ok::<_, TaskError>(()) })
            .await
            .unwrap();
    }

    let history = store
        .list(&RecordFilter {
            correlation_id: Some(first.correlation_id),
            ..RecordFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.status == Status::Completed));
}
