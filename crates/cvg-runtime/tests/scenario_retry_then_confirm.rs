//! Scenario: Retry Then Confirm
//!
//! # Invariants under test
//! - K1 with two transient failures then success ends CONFIRMED with
//!   `attempt_count = 3`.
//! - A fourth submission of K1 is a no-op returning the cached confirmed
//!   record; no network call is made.
//! - An operation that only ever sees transient failures ends FAILED after
//!   exactly `max_attempts` sends.
//!
//! Time is paused; retry delays elapse on the virtual clock.

use std::sync::Arc;
use std::time::Duration;

use cvg_db::MemoryStore;
use cvg_execution::RecordOutcome;
use cvg_runtime::{SubmissionRuntime, SubmissionSettings};
use cvg_schemas::OperationStatus;
use cvg_testkit::{memory_ledger, ChaosTransport, Fault, FaultProfile, IdempotentBackend};
use serde_json::json;

fn runtime(chaos: Arc<ChaosTransport>) -> SubmissionRuntime {
    let ledger = memory_ledger(&MemoryStore::new()).unwrap();
    SubmissionRuntime::new(ledger, chaos, SubmissionSettings::default())
}

#[tokio::test(start_paused = true)]
async fn k1_confirms_on_third_attempt_and_then_serves_the_cache() {
    let backend = Arc::new(IdempotentBackend::new());
    let chaos = Arc::new(ChaosTransport::new(backend.clone(), FaultProfile::reliable()));
    chaos.script("K1", [Fault::Unavailable, Fault::Timeout, Fault::Deliver]);
    let rt = runtime(chaos.clone());

    let started = tokio::time::Instant::now();
    rt.submit_with_token("K1", "/signup", json!({"email": "a@x"}))
        .unwrap();
    let op = rt.settled("K1").await.unwrap();

    assert_eq!(op.status, OperationStatus::Confirmed);
    assert_eq!(op.attempt_count, 3);
    assert_eq!(op.receipt, backend.receipt("K1"));
    // Two fixed 2s delays.
    assert!(started.elapsed() >= Duration::from_millis(4_000));

    let again = rt
        .submit_with_token("K1", "/signup", json!({"email": "a@x"}))
        .unwrap();
    match again {
        RecordOutcome::AlreadyRecorded(cached) => assert_eq!(cached, op),
        other => panic!("expected cached record, got {other:?}"),
    }
    assert!(!rt.is_running("K1"));
    assert_eq!(chaos.calls("K1"), 3);
    assert_eq!(backend.effect_count("K1"), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_forever_fails_after_max_attempts() {
    let backend = Arc::new(IdempotentBackend::new());
    let profile = FaultProfile {
        unavailable_rate: 1.0,
        ..FaultProfile::reliable()
    };
    let chaos = Arc::new(ChaosTransport::new(backend.clone(), profile));
    let rt = runtime(chaos.clone());

    let op = rt.submit("/orders", json!({"qty": 1})).unwrap();
    let done = rt.settled(&op.token).await.unwrap();

    assert_eq!(done.status, OperationStatus::Failed);
    assert_eq!(done.attempt_count, 5);
    assert_eq!(chaos.calls(&op.token), 5);
    assert_eq!(backend.total_effects(), 0);

    // Give a stray timer every chance to fire.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(chaos.calls(&op.token), 5);
}

#[tokio::test(start_paused = true)]
async fn hung_attempt_is_cut_by_the_attempt_timeout() {
    let backend = Arc::new(IdempotentBackend::new());
    let chaos = Arc::new(ChaosTransport::new(backend.clone(), FaultProfile::reliable()));
    chaos.script("K1", [Fault::Hang]);
    let rt = runtime(chaos.clone());

    rt.submit_with_token("K1", "/e", json!(null)).unwrap();
    let op = rt.settled("K1").await.unwrap();
    assert_eq!(op.status, OperationStatus::Confirmed);
    assert_eq!(op.attempt_count, 2);
}
