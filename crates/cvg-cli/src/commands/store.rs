//! `cvg store compact`.

use anyhow::Result;
use std::path::Path;

use super::open_default_stores;

pub fn compact(data_dir: Option<&Path>) -> Result<()> {
    let stores = open_default_stores(data_dir)?;
    let (ledger, snapshots) = stores.compact()?;
    println!("ledger_lines_dropped={}", ledger);
    println!("snapshot_lines_dropped={}", snapshots);
    println!("ledger_journal={}", stores.ledger_journal.path().display());
    println!("snapshot_journal={}", stores.snapshot_journal.path().display());
    Ok(())
}
