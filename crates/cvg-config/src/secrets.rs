//! Runtime secret resolution for the transport.
//!
//! Config stores only the env var NAME (`transport.api_key_env`). The value is
//! read once at startup and handed to the transport constructor. Error
//! messages reference the NAME, never the value, and `Debug` redacts.

use anyhow::{bail, Result};

use crate::TransportConfig;

#[derive(Clone)]
pub struct TransportSecret {
    /// Env var the key was read from.
    pub source_env: String,
    pub api_key: String,
}

impl std::fmt::Debug for TransportSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSecret")
            .field("source_env", &self.source_env)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

/// Resolve the bearer key named by `transport.api_key_env`.
///
/// - No env var configured → `Ok(None)` (unauthenticated transport).
/// - Configured but unset or blank → error naming the variable.
pub fn resolve_transport_secret(cfg: &TransportConfig) -> Result<Option<TransportSecret>> {
    resolve_with(cfg, |name| std::env::var(name).ok())
}

fn resolve_with<F>(cfg: &TransportConfig, lookup: F) -> Result<Option<TransportSecret>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(name) = cfg.api_key_env.as_deref() else {
        return Ok(None);
    };
    match lookup(name) {
        Some(v) if !v.trim().is_empty() => Ok(Some(TransportSecret {
            source_env: name.to_string(),
            api_key: v.trim().to_string(),
        })),
        _ => bail!("SECRET_MISSING: env var {name} (transport.api_key_env) is not set"),
    }
}
