//! Reconciliation map: `entity_id → latest accepted snapshot`.
//!
//! Not synchronized; [`crate::Reconciler`] owns it behind a lock. Entries are
//! never removed: a delete is stored as a tombstone.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use cvg_db::KvStore;
use cvg_schemas::{EntityEvent, EntitySnapshot};
use tracing::{error, warn};

use crate::freshness::{check, Freshness};

pub struct ReconciliationMap {
    entries: BTreeMap<String, EntitySnapshot>,
    store: Arc<dyn KvStore<EntitySnapshot>>,
}

impl std::fmt::Debug for ReconciliationMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationMap")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ReconciliationMap {
    /// Load all snapshots; unreadable records were dropped by the store.
    pub fn open(store: Arc<dyn KvStore<EntitySnapshot>>) -> Result<Self> {
        let report = store
            .load_all()
            .context("load reconciliation map")?;
        if report.corrupt > 0 {
            warn!(
                corrupt = report.corrupt,
                "reconciliation map loaded with unreadable records dropped"
            );
        }
        let entries = report
            .entries
            .into_iter()
            .filter(|(key, snap)| {
                let ok = *key == snap.entity_id;
                if !ok {
                    warn!(key = %key, entity_id = %snap.entity_id, "snapshot keyed under foreign id; skipped");
                }
                ok
            })
            .collect();
        Ok(Self { entries, store })
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntitySnapshot> {
        self.entries.get(entity_id)
    }

    pub fn freshness(&self, ev: &EntityEvent) -> Freshness {
        check(self.entries.get(&ev.entity_id), ev)
    }

    /// Replace the stored snapshot if `ev` is newer.
    ///
    /// Returns the previous snapshot on replacement, or the freshness verdict
    /// that caused the discard. A failed write is logged and the in-memory
    /// replacement stands.
    pub fn replace_if_newer(
        &mut self,
        ev: &EntityEvent,
    ) -> Result<Option<EntitySnapshot>, Freshness> {
        let verdict = self.freshness(ev);
        if !verdict.is_newer() {
            return Err(verdict);
        }
        let snap = EntitySnapshot::from_event(ev);
        if let Err(e) = self.store.put(&snap.entity_id, &snap) {
            error!(
                entity_id = %snap.entity_id,
                version_time = snap.version_time,
                error = %format!("{e:#}"),
                "snapshot not persisted; continuing in memory"
            );
        }
        Ok(self.entries.insert(snap.entity_id.clone(), snap))
    }

    /// Every snapshot except tombstones, sorted by entity id.
    pub fn active(&self) -> Vec<EntitySnapshot> {
        self.entries
            .values()
            .filter(|s| !s.is_tombstone())
            .cloned()
            .collect()
    }

    /// Every snapshot including tombstones, sorted by entity id.
    pub fn history(&self) -> Vec<EntitySnapshot> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
