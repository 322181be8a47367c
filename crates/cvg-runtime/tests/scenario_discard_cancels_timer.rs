//! Scenario: Discard Cancels Timer
//!
//! # Invariants under test
//! - Discarding an operation waiting out a retry delay cancels the timer.
//! - After the delay would have elapsed, no further send happens and the
//!   purged record does not reappear.
//! - A drive racing with a discard cannot start a new delivery task.
//! - Discarding an unknown token is a no-op.

use std::future::Future;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use cvg_db::MemoryStore;
use cvg_runtime::{DriveOutcome, SubmissionRuntime, SubmissionSettings};
use cvg_schemas::{Operation, OperationStatus};
use cvg_testkit::{memory_ledger, ChaosTransport, Fault, FaultProfile, IdempotentBackend};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn discard_during_backoff_prevents_resurrection() {
    let store = MemoryStore::<Operation>::new();
    let backend = Arc::new(IdempotentBackend::new());
    let chaos = Arc::new(ChaosTransport::new(backend.clone(), FaultProfile::reliable()));
    chaos.script("K1", [Fault::Unavailable]);
    let rt = SubmissionRuntime::new(
        memory_ledger(&store).unwrap(),
        chaos.clone(),
        SubmissionSettings::default(),
    );

    let mut rx = rt.ledger().subscribe();
    rt.submit_with_token("K1", "/orders", json!({"qty": 1}))
        .unwrap();
    loop {
        let op = rx.recv().await.unwrap();
        if op.status == OperationStatus::Retrying {
            break;
        }
    }
    assert!(rt.is_running("K1"));

    let purged = rt.discard("K1").await.unwrap();
    assert_eq!(purged.unwrap().attempt_count, 1);
    assert!(!rt.is_running("K1"));

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(chaos.calls("K1"), 1);
    assert_eq!(backend.total_effects(), 0);
    assert!(rt.ledger().get("K1").is_none());
    assert!(store.get("K1").is_none());
    assert!(rt.settled("K1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn drive_while_discard_pending_spawns_nothing() {
    let store = MemoryStore::<Operation>::new();
    let backend = Arc::new(IdempotentBackend::new());
    let chaos = Arc::new(ChaosTransport::new(backend.clone(), FaultProfile::reliable()));
    chaos.script("K1", [Fault::Unavailable]);
    let rt = SubmissionRuntime::new(
        memory_ledger(&store).unwrap(),
        chaos.clone(),
        SubmissionSettings::default(),
    );

    let mut rx = rt.ledger().subscribe();
    rt.submit_with_token("K1", "/orders", json!({"qty": 1}))
        .unwrap();
    loop {
        let op = rx.recv().await.unwrap();
        if op.status == OperationStatus::Retrying {
            break;
        }
    }

    // Poll the discard exactly once so it is suspended mid-way.
    let discard = rt.discard("K1");
    tokio::pin!(discard);
    let first = std::future::poll_fn(|cx| Poll::Ready(discard.as_mut().poll(cx))).await;

    assert_eq!(rt.drive("K1"), DriveOutcome::Unknown);
    assert!(!rt.is_running("K1"));

    let purged = match first {
        Poll::Ready(res) => res,
        Poll::Pending => discard.await,
    }
    .unwrap()
    .unwrap();
    assert_eq!(purged.status, OperationStatus::Retrying);
    assert_eq!(purged.attempt_count, 1);

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(chaos.calls("K1"), 1);
    assert_eq!(backend.total_effects(), 0);
    assert!(rt.ledger().get("K1").is_none());
    assert!(store.get("K1").is_none());
}

#[tokio::test]
async fn discarding_unknown_token_is_noop() {
    let backend = Arc::new(IdempotentBackend::new());
    let rt = SubmissionRuntime::new(
        memory_ledger(&MemoryStore::new()).unwrap(),
        backend,
        SubmissionSettings::default(),
    );
    assert_eq!(rt.discard("nope").await.unwrap(), None);
}
