//! Opens both journals under `storage.dir`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cvg_config::StorageConfig;
use cvg_db::{JournalStore, LEDGER_STORE, SNAPSHOT_STORE};
use cvg_execution::SubmissionLedger;
use cvg_reconcile::Reconciler;
use cvg_schemas::{EntitySnapshot, Operation};

/// The two shared mutable stores, plus their journals for maintenance.
pub struct Stores {
    pub ledger: Arc<SubmissionLedger>,
    pub reconciler: Arc<Reconciler>,
    pub ledger_journal: Arc<JournalStore<Operation>>,
    pub snapshot_journal: Arc<JournalStore<EntitySnapshot>>,
}

impl Stores {
    pub fn open(cfg: &StorageConfig) -> Result<Self> {
        Self::open_dir(&cfg.dir, cfg.compact_threshold)
    }

    pub fn open_dir(dir: impl AsRef<Path>, compact_threshold: usize) -> Result<Self> {
        let dir = dir.as_ref();
        let ledger_journal = Arc::new(JournalStore::open(dir, LEDGER_STORE, compact_threshold)?);
        let snapshot_journal =
            Arc::new(JournalStore::open(dir, SNAPSHOT_STORE, compact_threshold)?);

        let ledger = SubmissionLedger::open(ledger_journal.clone())
            .map_err(anyhow::Error::new)
            .with_context(|| format!("open ledger in {:?}", dir))?;
        let reconciler = Reconciler::open(snapshot_journal.clone())
            .with_context(|| format!("open reconciliation map in {:?}", dir))?;

        Ok(Self {
            ledger: Arc::new(ledger),
            reconciler: Arc::new(reconciler),
            ledger_journal,
            snapshot_journal,
        })
    }

    /// Compact both journals. Returns lines dropped per store.
    pub fn compact(&self) -> Result<(usize, usize)> {
        let ledger = self.ledger_journal.compact()?;
        let snapshots = self.snapshot_journal.compact()?;
        Ok((ledger, snapshots))
    }
}
