//! Scenario: Duplicate Submit Single Effect
//!
//! # Invariants under test
//! - Submitting the same token repeatedly, and driving it from several
//!   places, yields one CONFIRMED record and one remote effect.
//! - At most one delivery task exists per token.
//! - A lost ack (write applied, response lost) is retried and confirmed via
//!   the backend's replay, without a second effect.

use std::sync::Arc;

use cvg_db::MemoryStore;
use cvg_runtime::{DriveOutcome, SubmissionRuntime, SubmissionSettings};
use cvg_schemas::OperationStatus;
use cvg_testkit::{memory_ledger, ChaosTransport, Fault, FaultProfile, IdempotentBackend};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn repeated_submits_apply_once() {
    let backend = Arc::new(IdempotentBackend::new());
    let chaos = Arc::new(ChaosTransport::new(backend.clone(), FaultProfile::reliable()));
    chaos.script("K1", [Fault::Unavailable]);
    let ledger = memory_ledger(&MemoryStore::new()).unwrap();
    let rt = SubmissionRuntime::new(ledger.clone(), chaos.clone(), SubmissionSettings::default());

    for _ in 0..5 {
        rt.submit_with_token("K1", "/orders", json!({"qty": 1}))
            .unwrap();
    }
    assert_eq!(rt.drive("K1"), DriveOutcome::AlreadyRunning);
    assert_eq!(rt.running(), 1);

    let op = rt.settled("K1").await.unwrap();
    assert_eq!(op.status, OperationStatus::Confirmed);
    assert_eq!(ledger.len(), 1);
    assert_eq!(backend.effect_count("K1"), 1);
    assert_eq!(rt.drive("K1"), DriveOutcome::Settled);
}

#[tokio::test(start_paused = true)]
async fn lost_ack_is_confirmed_by_replay() {
    let backend = Arc::new(IdempotentBackend::new());
    let chaos = Arc::new(ChaosTransport::new(backend.clone(), FaultProfile::reliable()));
    chaos.script("K1", [Fault::LostAck, Fault::LostAck, Fault::Deliver]);
    let ledger = memory_ledger(&MemoryStore::new()).unwrap();
    let rt = SubmissionRuntime::new(ledger, chaos.clone(), SubmissionSettings::default());

    rt.submit_with_token("K1", "/orders", json!({"qty": 1}))
        .unwrap();
    let op = rt.settled("K1").await.unwrap();

    assert_eq!(op.status, OperationStatus::Confirmed);
    assert_eq!(op.attempt_count, 3);
    assert_eq!(backend.effect_count("K1"), 1);
    // Second lost ack and the final delivery both hit the replay path.
    assert_eq!(backend.replays(), 2);
    assert_eq!(op.receipt, backend.receipt("K1"));
}

#[tokio::test(start_paused = true)]
async fn many_tokens_under_flaky_transport_each_apply_at_most_once() {
    let backend = Arc::new(IdempotentBackend::new());
    let chaos = Arc::new(ChaosTransport::new(backend.clone(), FaultProfile::flaky(11)));
    let ledger = memory_ledger(&MemoryStore::new()).unwrap();
    let rt = SubmissionRuntime::new(ledger, chaos.clone(), SubmissionSettings::default());

    let mut tokens = Vec::new();
    for i in 0..25 {
        tokens.push(rt.submit("/orders", json!({ "n": i })).unwrap().token);
    }
    for token in &tokens {
        let op = rt.settled(token).await.unwrap();
        assert!(op.attempt_count <= 5);
        assert!(backend.effect_count(token) <= 1);
        if op.status == OperationStatus::Confirmed {
            assert_eq!(backend.effect_count(token), 1);
        }
        assert!(chaos.calls(token) <= 5);
    }
}
