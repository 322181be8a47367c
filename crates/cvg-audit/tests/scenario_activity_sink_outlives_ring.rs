//! Scenario: Activity Sink Outlives Ring
//!
//! # Invariants under test
//! - The in-memory feed keeps only the last N entries.
//! - The JSONL sink receives every entry, one line each, in push order.
//! - Sink lines decode back into `ActivityEntry`.

use cvg_audit::{ActivityEntry, ActivityFeed, ActivityLog, ActivitySource};
use serde_json::json;

#[test]
fn sink_keeps_entries_the_ring_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("activity.jsonl");

    let feed = ActivityFeed::new(2).with_sink(ActivityLog::new(&path).unwrap());
    feed.push(ActivitySource::Operation, "K1", json!({"status": "PENDING"}));
    feed.push(ActivitySource::Event, "A", json!({"version_time": 110}));
    feed.push(ActivitySource::Operation, "K1", json!({"status": "CONFIRMED"}));

    assert_eq!(feed.len(), 2);

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<ActivityEntry> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines.iter().map(|e| e.seq).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(lines[1].source, ActivitySource::Event);
    assert_eq!(lines[2].detail, json!({"status": "CONFIRMED"}));
}
