//! cvg-db
//!
//! Local persistence for the ledger (`token → Operation`) and the
//! reconciliation map (`entity_id → EntitySnapshot`).
//!
//! # Contract
//! - Survives a restart of the local process. Nothing stronger.
//! - Unreadable records are skipped and counted, never fatal.
//! - Per-key last-write-wins on load.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

mod journal;
mod memory;

pub use journal::JournalStore;
pub use memory::MemoryStore;

pub const LEDGER_STORE: &str = "ledger";
pub const SNAPSHOT_STORE: &str = "snapshots";

/// Result of replaying a store on startup.
#[derive(Debug, Clone)]
pub struct LoadReport<V> {
    /// Live entries after replay, keyed and sorted by key.
    pub entries: BTreeMap<String, V>,
    /// Journal lines read (including corrupt ones).
    pub lines: usize,
    /// Lines skipped because they could not be decoded.
    pub corrupt: usize,
}

impl<V> LoadReport<V> {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            lines: 0,
            corrupt: 0,
        }
    }
}

/// Key-value store backing one namespace.
///
/// Implementations must make `put`/`remove` durable before returning `Ok`.
pub trait KvStore<V>: Send + Sync
where
    V: Serialize + DeserializeOwned,
{
    fn load_all(&self) -> Result<LoadReport<V>>;
    fn put(&self, key: &str, value: &V) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}
