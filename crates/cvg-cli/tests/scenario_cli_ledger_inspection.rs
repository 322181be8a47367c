//! Scenario: CLI Ledger Inspection
//!
//! # Invariants under test
//! - `ledger list` shows every record and `--status` filters case-insensitively.
//! - `ledger show` prints the record as JSON; an unknown token fails.
//! - `ledger purge` needs `--token` or `--settled`, and `--settled` never
//!   removes unresolved records.
//! - `entities list` hides tombstones unless `--all`.
//! - `store compact` leaves every live record readable.

use assert_cmd::prelude::*;
use cvg_execution::{Outcome, RetryPolicy};
use cvg_runtime::Stores;
use cvg_schemas::{EntityEvent, EventKind, Operation, OperationStatus};
use predicates::prelude::*;
use serde_json::json;
use std::path::Path;
use std::process::Command;

fn seed(dir: &Path) {
    let stores = Stores::open_dir(dir, 1_000).unwrap();
    let policy = RetryPolicy::default();

    for token in ["K-pending", "K-done", "K-failed"] {
        stores
            .ledger
            .record(Operation::new(token, "/orders", json!({ "qty": 1 })))
            .unwrap();
    }
    stores.ledger.begin_attempt("K-done", &policy);
    stores
        .ledger
        .resolve("K-done", &Outcome::Success { receipt: json!({ "id": 1 }) }, &policy)
        .unwrap();
    stores.ledger.begin_attempt("K-failed", &policy);
    stores
        .ledger
        .resolve(
            "K-failed",
            &Outcome::Terminal { reason: "http 422: bad qty".into() },
            &policy,
        )
        .unwrap();

    stores.reconciler.apply(&EntityEvent::new("E1", 10, EventKind::Created, json!({})));
    stores.reconciler.apply(&EntityEvent::new("E2", 10, EventKind::Created, json!({})));
    stores.reconciler.apply(&EntityEvent::new("E2", 20, EventKind::Deleted, json!(null)));
}

fn cvg(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cvg").unwrap();
    cmd.env_remove("CVG_CONFIG").arg("--data-dir").arg(dir);
    cmd
}

#[test]
fn list_and_filter_by_status() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path());

    cvg(tmp.path())
        .args(["ledger", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("token=K-pending status=PENDING"))
        .stdout(predicate::str::contains("token=K-done status=CONFIRMED attempts=1"))
        .stdout(predicate::str::contains("count=3"));

    cvg(tmp.path())
        .args(["ledger", "list", "--status", "failed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("token=K-failed"))
        .stdout(predicate::str::contains("K-done").not())
        .stdout(predicate::str::contains("count=1"));

    cvg(tmp.path())
        .args(["ledger", "list", "--status", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --status"));
}

#[test]
fn show_prints_json_and_rejects_unknown_tokens() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path());

    let out = cvg(tmp.path())
        .args(["ledger", "show", "--token", "K-failed"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["status"], "FAILED");
    assert_eq!(v["last_error"], "http 422: bad qty");

    cvg(tmp.path())
        .args(["ledger", "show", "--token", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown token"));
}

#[test]
fn purge_settled_keeps_unresolved_records() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path());

    cvg(tmp.path())
        .args(["ledger", "purge"])
        .assert()
        .failure();

    cvg(tmp.path())
        .args(["ledger", "purge", "--settled"])
        .assert()
        .success()
        .stdout(predicate::str::contains("purged=2"));

    let stores = Stores::open_dir(tmp.path(), 1_000).unwrap();
    let left: Vec<_> = stores.ledger.list().into_iter().map(|op| op.token).collect();
    assert_eq!(left, vec!["K-pending".to_string()]);
    assert_eq!(
        stores.ledger.get("K-pending").unwrap().status,
        OperationStatus::Pending
    );
    drop(stores);

    cvg(tmp.path())
        .args(["ledger", "purge", "--token", "K-pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains("purged=true token=K-pending"));

    cvg(tmp.path())
        .args(["ledger", "purge", "--token", "K-pending"])
        .assert()
        .failure();
}

#[test]
fn entities_list_hides_tombstones_unless_all() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path());

    cvg(tmp.path())
        .args(["entities", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("entity_id=E1"))
        .stdout(predicate::str::contains("entity_id=E2").not())
        .stdout(predicate::str::contains("count=1"));

    cvg(tmp.path())
        .args(["entities", "list", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("entity_id=E2 version_time=20 kind=deleted"))
        .stdout(predicate::str::contains("count=2"));
}

#[test]
fn compact_keeps_live_records() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path());

    cvg(tmp.path())
        .args(["store", "compact"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ledger_lines_dropped="));

    let stores = Stores::open_dir(tmp.path(), 1_000).unwrap();
    assert_eq!(stores.ledger.len(), 3);
    assert_eq!(stores.ledger.get("K-done").unwrap().attempt_count, 1);
    assert_eq!(stores.reconciler.history().len(), 2);
}
