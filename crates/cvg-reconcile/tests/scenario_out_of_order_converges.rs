//! Scenario: Out Of Order Converges
//!
//! # Invariants under test
//! - Events for A at t=100 (created), 105 (updated), 110 (updated) delivered
//!   as [110, 100, 105] leave A at t=110, kind=updated, with the t=110 body.
//! - Both late events are discarded as stale at apply time.
//! - Only the first event produces a notification.

use std::sync::Arc;

use cvg_db::MemoryStore;
use cvg_reconcile::{ApplyOutcome, Freshness, Reconciler};
use cvg_schemas::{EntityEvent, EventKind};
use serde_json::json;

#[test]
fn late_events_are_discarded_against_the_newest() {
    let r = Reconciler::open(Arc::new(MemoryStore::new())).unwrap();
    let mut rx = r.subscribe();

    let e100 = EntityEvent::new("A", 100, EventKind::Created, json!({"status": "new"}));
    let e105 = EntityEvent::new("A", 105, EventKind::Updated, json!({"status": "packed"}));
    let e110 = EntityEvent::new("A", 110, EventKind::Updated, json!({"status": "shipped"}));

    assert!(r.apply(&e110).is_replaced());
    assert_eq!(
        r.apply(&e100),
        ApplyOutcome::Discarded {
            freshness: Freshness::Stale {
                stored: 110,
                got: 100
            }
        }
    );
    assert_eq!(
        r.apply(&e105),
        ApplyOutcome::Discarded {
            freshness: Freshness::Stale {
                stored: 110,
                got: 105
            }
        }
    );

    let a = r.get("A").unwrap();
    assert_eq!(a.version_time, 110);
    assert_eq!(a.kind, EventKind::Updated);
    assert_eq!(a.body, json!({"status": "shipped"}));

    assert_eq!(rx.try_recv().unwrap().version_time, 110);
    assert!(rx.try_recv().is_err());
}

#[test]
fn duplicate_delivery_is_already_seen() {
    let r = Reconciler::open(Arc::new(MemoryStore::new())).unwrap();
    let ev = EntityEvent::new("A", 42, EventKind::Created, json!({}));
    assert!(r.apply(&ev).is_replaced());
    assert_eq!(
        r.apply(&ev),
        ApplyOutcome::Discarded {
            freshness: Freshness::AlreadySeen { version: 42 }
        }
    );
    assert_eq!(r.len(), 1);
}
