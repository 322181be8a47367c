//! `cvg entities list`.

use anyhow::Result;
use std::path::Path;

use super::open_default_stores;

pub fn list(data_dir: Option<&Path>, all: bool) -> Result<()> {
    let stores = open_default_stores(data_dir)?;
    let snapshots = if all {
        stores.reconciler.history()
    } else {
        stores.reconciler.active()
    };

    for s in &snapshots {
        println!(
            "entity_id={} version_time={} kind={}",
            s.entity_id,
            s.version_time,
            s.kind.as_str()
        );
    }
    println!("count={}", snapshots.len());
    Ok(())
}
