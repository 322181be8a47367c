//! `cvg ledger`: list, show, purge.

use anyhow::{bail, Context, Result};
use std::path::Path;

use super::{open_default_stores, parse_status};

pub fn list(data_dir: Option<&Path>, status: Option<&str>) -> Result<()> {
    let filter = status.map(parse_status).transpose()?;
    let stores = open_default_stores(data_dir)?;

    let ops = stores.ledger.list();

    let mut n = 0usize;
    for op in ops.iter().filter(|op| filter.map_or(true, |s| op.status == s)) {
        n += 1;
        println!(
            "token={} status={} attempts={} endpoint={} updated_at_utc={}",
            op.token,
            op.status,
            op.attempt_count,
            op.endpoint,
            op.updated_at.to_rfc3339()
        );
    }
    println!("count={}", n);
    Ok(())
}

pub fn show(data_dir: Option<&Path>, token: &str) -> Result<()> {
    let stores = open_default_stores(data_dir)?;
    let Some(op) = stores.ledger.get(token) else {
        bail!("unknown token: {}", token);
    };
    let json = serde_json::to_string_pretty(&op).context("serialize operation failed")?;
    println!("{}", json);
    Ok(())
}

pub fn purge(data_dir: Option<&Path>, token: Option<&str>, settled: bool) -> Result<()> {
    let stores = open_default_stores(data_dir)?;

    if let Some(token) = token {
        match stores.ledger.purge(token)? {
            Some(op) => println!("purged=true token={} status={}", op.token, op.status),
            None => bail!("unknown token: {}", token),
        }
    }

    if settled {
        let tokens = stores.ledger.purge_settled()?;
        for t in &tokens {
            println!("purged_token={}", t);
        }
        println!("purged={}", tokens.len());
    }
    Ok(())
}
