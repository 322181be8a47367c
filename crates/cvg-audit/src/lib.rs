//! Recent-activity feed.
//!
//! A bounded FIFO of the last N raw events and operation transitions, for
//! diagnostics. Optionally every entry is also appended to a JSON Lines file
//! that outlives the ring.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivitySource {
    Operation,
    Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Strictly increasing per feed; survives eviction so gaps show drops.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub source: ActivitySource,
    /// Token or entity id.
    pub subject: String,
    pub detail: Value,
}

/// Append-only JSONL sink. One entry per line, keys sorted.
#[derive(Debug)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    /// Creates the log and ensures parent dirs exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &ActivityEntry) -> Result<()> {
        let mut line = canonical_json_line(entry)?;
        line.push('\n');
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open activity log {:?}", self.path))?;
        f.write_all(line.as_bytes())
            .context("write activity line failed")?;
        Ok(())
    }
}

#[derive(Debug)]
struct Ring {
    next_seq: u64,
    entries: VecDeque<ActivityEntry>,
}

/// Bounded, thread-safe activity ring with an optional file sink.
#[derive(Debug)]
pub struct ActivityFeed {
    capacity: usize,
    ring: Mutex<Ring>,
    sink: Option<ActivityLog>,
}

impl ActivityFeed {
    /// `capacity` is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: Mutex::new(Ring {
                next_seq: 1,
                entries: VecDeque::with_capacity(capacity),
            }),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: ActivityLog) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record one entry, evicting the oldest when full.
    ///
    /// A sink write failure is logged and does not lose the in-memory entry.
    pub fn push(
        &self,
        source: ActivitySource,
        subject: impl Into<String>,
        detail: Value,
    ) -> ActivityEntry {
        let entry = {
            let mut ring = self.lock();
            let entry = ActivityEntry {
                seq: ring.next_seq,
                at: Utc::now(),
                source,
                subject: subject.into(),
                detail,
            };
            ring.next_seq += 1;
            if ring.entries.len() == self.capacity {
                ring.entries.pop_front();
            }
            ring.entries.push_back(entry.clone());
            entry
        };

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&entry) {
                warn!(path = ?sink.path(), error = %e, "activity sink write failed");
            }
        }
        entry
    }

    /// Up to `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        self.lock().entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize activity entry failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), sort_keys(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
