//! Typed engine configuration.
//!
//! Every field has a default so an empty config is a valid config. The
//! registry in [`crate::consumed_pointers_for_mode`] must track these keys.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub submission: SubmissionConfig,
    pub transport: TransportConfig,
    pub storage: StorageConfig,
    pub activity: ActivityConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Total delivery attempts per token, across restarts.
    pub max_attempts: u32,
    /// Upper bound on one network round trip; expiry counts as transient.
    pub attempt_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout_ms: 10_000,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryConfig {
    Fixed { delay_ms: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::Fixed { delay_ms: 2_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// Name of the env var holding the bearer key. Never the key itself.
    pub api_key_env: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout_ms: 5_000,
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: String,
    /// Journal line count above which a store is eligible for compaction.
    pub compact_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: "./converge-data".to_string(),
            compact_threshold: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub capacity: usize,
    pub log_path: Option<String>,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            log_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub addr: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8899".to_string(),
        }
    }
}

impl EngineConfig {
    /// Decode from the merged config JSON and validate bounds.
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: EngineConfig =
            serde_json::from_value(v.clone()).context("engine config decode failed")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.submission.max_attempts == 0 {
            bail!("CONFIG_INVALID: submission.max_attempts must be >= 1");
        }
        if self.submission.attempt_timeout_ms == 0 {
            bail!("CONFIG_INVALID: submission.attempt_timeout_ms must be > 0");
        }
        if let RetryConfig::Exponential { base_ms, max_ms } = self.submission.retry {
            if base_ms == 0 || max_ms < base_ms {
                bail!(
                    "CONFIG_INVALID: exponential retry requires 0 < base_ms <= max_ms \
                     (got base_ms={base_ms} max_ms={max_ms})"
                );
            }
        }
        if self.activity.capacity == 0 {
            bail!("CONFIG_INVALID: activity.capacity must be >= 1");
        }
        if self.storage.dir.trim().is_empty() {
            bail!("CONFIG_INVALID: storage.dir must not be empty");
        }
        Ok(())
    }
}
