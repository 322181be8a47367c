//! `cvg resume`: one-shot resumption without the daemon.
//!
//! Re-enters every unresolved operation with its persisted attempt count and
//! waits until each one is CONFIRMED or FAILED.

use anyhow::Result;
use cvg_runtime::{SubmissionRuntime, SubmissionSettings};
use cvg_schemas::OperationStatus;
use cvg_transport_http::HttpTransport;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::{load_config, open_stores};

pub async fn resume(data_dir: Option<&Path>, config_paths: &[String]) -> Result<()> {
    let (loaded, cfg) = load_config(config_paths)?;
    let stores = open_stores(data_dir, &cfg)?;
    let transport = HttpTransport::from_config(&cfg.transport)?;
    info!(config_hash = %loaded.config_hash, base_url = %transport.base_url(), "resuming");

    let runtime = SubmissionRuntime::new(
        Arc::clone(&stores.ledger),
        Arc::new(transport),
        SubmissionSettings::from_config(&cfg.submission),
    );

    let report = runtime.resume();

    let mut confirmed = 0usize;
    let mut failed = 0usize;
    for token in &report.tokens {
        match runtime.settled(token).await {
            Some(op) if op.status == OperationStatus::Confirmed => {
                confirmed += 1;
                println!("token={} status=CONFIRMED attempts={}", token, op.attempt_count);
            }
            Some(op) => {
                failed += 1;
                println!(
                    "token={} status={} attempts={} last_error={}",
                    token,
                    op.status,
                    op.attempt_count,
                    op.last_error.as_deref().unwrap_or("")
                );
            }
            None => println!("token={} status=GONE", token),
        }
    }
    runtime.shutdown().await;

    println!("config_hash={}", loaded.config_hash);
    println!("inspected={}", report.inspected);
    println!("resumed={}", report.resumed);
    println!("confirmed={}", confirmed);
    println!("failed={}", failed);
    Ok(())
}
