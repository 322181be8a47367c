//! In-memory store for tests and ephemeral runs.
//!
//! Clones share the same underlying map, so a "restart" in tests is modelled
//! by building a fresh ledger/map over a clone of the same store.

use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::{KvStore, LoadReport};

#[derive(Debug)]
pub struct MemoryStore<V> {
    entries: Arc<Mutex<BTreeMap<String, V>>>,
    fail_writes: Arc<AtomicBool>,
}

impl<V> Clone for MemoryStore<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            fail_writes: Arc::clone(&self.fail_writes),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<V: Clone> MemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put`/`remove` fail (simulates a full disk).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> KvStore<V> for MemoryStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send,
{
    fn load_all(&self) -> Result<LoadReport<V>> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let lines = entries.len();
        Ok(LoadReport {
            entries,
            lines,
            corrupt: 0,
        })
    }

    fn put(&self, key: &str, value: &V) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store write refused for key {key}");
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store remove refused for key {key}");
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}
