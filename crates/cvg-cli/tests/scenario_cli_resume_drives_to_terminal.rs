//! Scenario: CLI Resume Drives To Terminal
//!
//! # Invariants under test
//! - `cvg resume` sends every unresolved record and exits once each is
//!   CONFIRMED or FAILED.
//! - The persisted attempt count carries over: a record with one attempt
//!   already spent gets only the remainder of its budget.
//! - `config-hash` is stable for the same layers.

use assert_cmd::prelude::*;
use cvg_execution::RetryPolicy;
use cvg_runtime::Stores;
use cvg_schemas::{Operation, OperationStatus};
use httpmock::prelude::*;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::process::Command;

fn write_config(dir: &Path, base_url: &str, max_attempts: u32) -> String {
    let path = dir.join("converge.yaml");
    let yaml = format!(
        "submission:\n  max_attempts: {max_attempts}\n  attempt_timeout_ms: 2000\n  retry:\n    kind: fixed\n    delay_ms: 10\ntransport:\n  base_url: \"{base_url}\"\n  timeout_ms: 2000\nstorage:\n  dir: \"{}\"\n",
        dir.join("data").display()
    );
    fs::write(&path, yaml).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn resume_confirms_pending_records() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(POST).path("/orders").header_exists("Idempotency-Key");
        then.status(201).json_body(json!({ "order_id": 7 }));
    });

    let tmp = tempfile::tempdir().unwrap();
    let cfg = write_config(tmp.path(), &server.base_url(), 5);
    {
        let stores = Stores::open_dir(tmp.path().join("data"), 1_000).unwrap();
        stores
            .ledger
            .record(Operation::new("K1", "/orders", json!({ "qty": 2 })))
            .unwrap();
        stores
            .ledger
            .record(Operation::new("K2", "/orders", json!({ "qty": 3 })))
            .unwrap();
    }

    Command::cargo_bin("cvg")
        .unwrap()
        .env_remove("CVG_CONFIG")
        .args(["resume", "--config", &cfg])
        .assert()
        .success()
        .stdout(predicate::str::contains("resumed=2"))
        .stdout(predicate::str::contains("confirmed=2"))
        .stdout(predicate::str::contains("failed=0"));

    m.assert_hits(2);
    let stores = Stores::open_dir(tmp.path().join("data"), 1_000).unwrap();
    for token in ["K1", "K2"] {
        let op = stores.ledger.get(token).unwrap();
        assert_eq!(op.status, OperationStatus::Confirmed);
        assert_eq!(op.receipt, Some(json!({ "order_id": 7 })));
    }
}

#[test]
fn resume_honours_the_persisted_attempt_count() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(POST).path("/orders");
        then.status(503).body("busy");
    });

    let tmp = tempfile::tempdir().unwrap();
    let cfg = write_config(tmp.path(), &server.base_url(), 3);
    {
        let stores = Stores::open_dir(tmp.path().join("data"), 1_000).unwrap();
        stores
            .ledger
            .record(Operation::new("K1", "/orders", json!({})))
            .unwrap();
        // Crash after claiming the first attempt: counted, never resolved.
        stores.ledger.begin_attempt("K1", &RetryPolicy::default());
    }

    Command::cargo_bin("cvg")
        .unwrap()
        .env_remove("CVG_CONFIG")
        .args(["resume", "--config", &cfg])
        .assert()
        .success()
        .stdout(predicate::str::contains("failed=1"));

    // 3 total attempts, 1 already spent before the restart.
    m.assert_hits(2);
    let stores = Stores::open_dir(tmp.path().join("data"), 1_000).unwrap();
    let op = stores.ledger.get("K1").unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.attempt_count, 3);
}

#[test]
fn config_hash_is_stable() {
    let tmp = tempfile::tempdir().unwrap();
    let a = tmp.path().join("a.yaml");
    let b = tmp.path().join("b.yaml");
    fs::write(&a, "storage:\n  dir: ./x\n").unwrap();
    fs::write(&b, "submission:\n  max_attempts: 3\n").unwrap();
    let args = ["config-hash", a.to_str().unwrap(), b.to_str().unwrap()];

    let first = Command::cargo_bin("cvg").unwrap().args(args).output().unwrap();
    let second = Command::cargo_bin("cvg").unwrap().args(args).output().unwrap();
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
    assert!(String::from_utf8_lossy(&first.stdout).starts_with("config_hash="));

    Command::cargo_bin("cvg")
        .unwrap()
        .args(["config-hash"])
        .assert()
        .failure();
}
