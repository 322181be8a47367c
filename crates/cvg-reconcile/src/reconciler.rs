//! Out-of-order event reconciler.
//!
//! `apply` is the only mutation path into the map. All applies are
//! serialized behind one lock, which keeps per-entity `version_time`
//! monotonic under concurrent callers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use cvg_db::KvStore;
use cvg_schemas::{EntityEvent, EntitySnapshot, EventKind};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::freshness::Freshness;
use crate::map::ReconciliationMap;

const NOTIFY_CHANNEL_CAPACITY: usize = 256;

/// Emitted once per accepted mutation, in apply order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReplaced {
    /// Strictly increasing per reconciler instance.
    pub seq: u64,
    pub entity_id: String,
    pub kind: EventKind,
    pub version_time: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Replaced {
        previous: Option<EntitySnapshot>,
        current: EntitySnapshot,
        seq: u64,
    },
    /// Expected under reordering and duplication; not an error.
    Discarded { freshness: Freshness },
}

impl ApplyOutcome {
    pub fn is_replaced(&self) -> bool {
        matches!(self, ApplyOutcome::Replaced { .. })
    }
}

#[derive(Debug)]
struct Inner {
    map: ReconciliationMap,
    last_seq: u64,
}

#[derive(Debug)]
pub struct Reconciler {
    inner: Mutex<Inner>,
    notify: broadcast::Sender<SnapshotReplaced>,
}

impl Reconciler {
    pub fn open(store: Arc<dyn KvStore<EntitySnapshot>>) -> Result<Self> {
        let map = ReconciliationMap::open(store)?;
        debug!(entities = map.len(), "reconciler opened");
        let (notify, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Mutex::new(Inner { map, last_seq: 0 }),
            notify,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotReplaced> {
        self.notify.subscribe()
    }

    pub fn apply(&self, ev: &EntityEvent) -> ApplyOutcome {
        let mut inner = self.lock();
        match inner.map.replace_if_newer(ev) {
            Ok(previous) => {
                inner.last_seq += 1;
                let seq = inner.last_seq;
                let current = EntitySnapshot::from_event(ev);
                let note = SnapshotReplaced {
                    seq,
                    entity_id: ev.entity_id.clone(),
                    kind: ev.kind,
                    version_time: ev.version_time,
                };
                // Sent under the lock so receivers observe seq order.
                let _ = self.notify.send(note);
                debug!(
                    entity_id = %ev.entity_id,
                    version_time = ev.version_time,
                    kind = ev.kind.as_str(),
                    seq,
                    "snapshot replaced"
                );
                ApplyOutcome::Replaced {
                    previous,
                    current,
                    seq,
                }
            }
            Err(freshness) => {
                debug!(
                    entity_id = %ev.entity_id,
                    version_time = ev.version_time,
                    verdict = freshness.as_str(),
                    "event discarded"
                );
                ApplyOutcome::Discarded { freshness }
            }
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<EntitySnapshot> {
        self.lock().map.get(entity_id).cloned()
    }

    /// Snapshots excluding tombstones, sorted by entity id.
    pub fn active(&self) -> Vec<EntitySnapshot> {
        self.lock().map.active()
    }

    /// All snapshots including tombstones, sorted by entity id.
    pub fn history(&self) -> Vec<EntitySnapshot> {
        self.lock().map.history()
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvg_db::MemoryStore;
    use serde_json::json;

    fn reconciler() -> Reconciler {
        Reconciler::open(Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn seq_counts_only_accepted_mutations() {
        let r = reconciler();
        let mut rx = r.subscribe();

        r.apply(&EntityEvent::new("A", 10, EventKind::Created, json!(1)));
        r.apply(&EntityEvent::new("A", 5, EventKind::Updated, json!(2)));
        r.apply(&EntityEvent::new("B", 1, EventKind::Created, json!(3)));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!((first.seq, first.entity_id.as_str()), (1, "A"));
        assert_eq!((second.seq, second.entity_id.as_str()), (2, "B"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn replaced_reports_previous_snapshot() {
        let r = reconciler();
        r.apply(&EntityEvent::new("A", 1, EventKind::Created, json!("v1")));
        match r.apply(&EntityEvent::new("A", 2, EventKind::Updated, json!("v2"))) {
            ApplyOutcome::Replaced {
                previous, current, ..
            } => {
                assert_eq!(previous.unwrap().body, json!("v1"));
                assert_eq!(current.body, json!("v2"));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn equal_version_time_keeps_first_arrival() {
        let r = reconciler();
        r.apply(&EntityEvent::new("A", 7, EventKind::Updated, json!("first")));
        let out = r.apply(&EntityEvent::new("A", 7, EventKind::Deleted, json!("second")));
        assert_eq!(
            out,
            ApplyOutcome::Discarded {
                freshness: Freshness::AlreadySeen { version: 7 }
            }
        );
        assert_eq!(r.get("A").unwrap().body, json!("first"));
    }
}
