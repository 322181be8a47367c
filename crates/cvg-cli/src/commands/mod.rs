//! Command handler modules for the `cvg` CLI.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod entities;
pub mod ledger;
pub mod resume;
pub mod store;

use anyhow::{Context, Result};
use cvg_config::{
    empty_config, load_layered_yaml, report_unused_keys, ConfigMode, EngineConfig, LoadedConfig,
    UnusedKeyPolicy,
};
use cvg_runtime::Stores;
use cvg_schemas::OperationStatus;
use std::path::Path;

/// Same variable the daemon reads: comma-separated YAML layers.
pub const ENV_CONFIG: &str = "CVG_CONFIG";

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Load layered config from explicit paths, else from `CVG_CONFIG`, else
/// defaults only.
pub fn load_config(paths: &[String]) -> Result<(LoadedConfig, EngineConfig)> {
    let loaded = if !paths.is_empty() {
        let refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
        load_layered_yaml(&refs)?
    } else {
        match std::env::var(ENV_CONFIG) {
            Ok(raw) if !raw.trim().is_empty() => {
                let refs: Vec<&str> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .collect();
                load_layered_yaml(&refs)?
            }
            _ => empty_config()?,
        }
    };

    let report = report_unused_keys(ConfigMode::Offline, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        eprintln!(
            "WARN: CONFIG_UNUSED_KEYS mode={} unused_leaf_keys={}",
            report.mode,
            report.unused_leaf_pointers.len()
        );
        for p in report.unused_leaf_pointers.iter().take(50) {
            eprintln!("  unused={}", p);
        }
    }

    let cfg = loaded.engine()?;
    Ok((loaded, cfg))
}

/// Open both journals. `--data-dir` wins over `storage.dir`.
pub fn open_stores(data_dir: Option<&Path>, cfg: &EngineConfig) -> Result<Stores> {
    let dir = match data_dir {
        Some(d) => d.to_path_buf(),
        None => Path::new(&cfg.storage.dir).to_path_buf(),
    };
    Stores::open_dir(&dir, cfg.storage.compact_threshold)
        .with_context(|| format!("open stores in {:?}", dir))
}

/// Stores for the commands that take no `--config`.
pub fn open_default_stores(data_dir: Option<&Path>) -> Result<Stores> {
    let (_, cfg) = load_config(&[])?;
    open_stores(data_dir, &cfg)
}

pub fn parse_status(raw: &str) -> Result<OperationStatus> {
    OperationStatus::parse(raw).with_context(|| {
        format!(
            "invalid --status '{}'. expected one of: PENDING | RETRYING | CONFIRMED | FAILED",
            raw
        )
    })
}
