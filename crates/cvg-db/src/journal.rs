//! Append-only JSON Lines journal.
//!
//! One line per mutation:
//!
//! ```text
//! {"key":"k1","value":{...}}   put
//! {"key":"k1","value":null}    remove
//! ```
//!
//! Replay applies lines in order; the last line per key wins. A line that
//! does not parse (torn write, manual edit) is skipped and counted, so the
//! previous good value for that key survives.
//!
//! Compaction rewrites the live set into `<name>.jsonl.tmp` and renames it
//! over the journal.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::{KvStore, LoadReport};

#[derive(Serialize)]
struct JournalLine<'a, V> {
    key: &'a str,
    value: Option<&'a V>,
}

#[derive(Debug, Default)]
struct JournalState {
    /// Lines currently in the file.
    lines: usize,
    /// Keys whose last line is a put.
    live: HashSet<String>,
}

pub struct JournalStore<V> {
    path: PathBuf,
    compact_threshold: usize,
    state: Mutex<JournalState>,
    _value: PhantomData<fn() -> V>,
}

impl<V> std::fmt::Debug for JournalStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("path", &self.path)
            .field("compact_threshold", &self.compact_threshold)
            .finish()
    }
}

impl<V> JournalStore<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Open (or create) `<dir>/<name>.jsonl`.
    ///
    /// The journal is scanned once to seed the compaction counters; corrupt
    /// lines are tolerated here exactly as in [`KvStore::load_all`].
    pub fn open(dir: impl AsRef<Path>, name: &str, compact_threshold: usize) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("create_dir_all {:?}", dir))?;
        let path = dir.join(format!("{name}.jsonl"));
        terminate_torn_tail(&path)?;

        let store = Self {
            path,
            compact_threshold,
            state: Mutex::new(JournalState::default()),
            _value: PhantomData,
        };

        let report = store.replay()?;
        {
            let mut st = store.lock();
            st.lines = report.lines;
            st.live = report.entries.keys().cloned().collect();
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the journal so it holds exactly one line per live key.
    ///
    /// Returns the number of lines dropped.
    pub fn compact(&self) -> Result<usize> {
        let mut st = self.lock();
        self.compact_locked(&mut st)
    }

    fn compact_locked(&self, st: &mut JournalState) -> Result<usize> {
        let report = self.replay()?;
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut f = File::create(&tmp).with_context(|| format!("create {:?}", tmp))?;
            for (key, value) in &report.entries {
                let line = encode_line(key, Some(value))?;
                f.write_all(line.as_bytes())
                    .and_then(|_| f.write_all(b"\n"))
                    .with_context(|| format!("write {:?}", tmp))?;
            }
            f.sync_all().with_context(|| format!("sync {:?}", tmp))?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename {:?} -> {:?}", tmp, self.path))?;

        let dropped = report.lines.saturating_sub(report.entries.len());
        st.lines = report.entries.len();
        st.live = report.entries.into_keys().collect();
        debug!(path = ?self.path, dropped, "journal compacted");
        Ok(dropped)
    }

    fn append(&self, key: &str, value: Option<&V>) -> Result<()> {
        let line = encode_line(key, value)?;
        let mut st = self.lock();

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open journal {:?}", self.path))?;
        // One write call per record keeps a torn write confined to one line.
        let mut buf = line.into_bytes();
        buf.push(b'\n');
        f.write_all(&buf)
            .with_context(|| format!("append journal {:?}", self.path))?;

        st.lines += 1;
        match value {
            Some(_) => st.live.insert(key.to_string()),
            None => st.live.remove(key),
        };

        if st.lines > self.compact_threshold && st.lines > st.live.len() * 2 {
            // A failed compaction leaves the journal intact; the write above
            // is already durable.
            if let Err(e) = self.compact_locked(&mut st) {
                warn!(path = ?self.path, error = %e, "journal compaction failed");
            }
        }
        Ok(())
    }

    fn replay(&self) -> Result<LoadReport<V>> {
        let f = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadReport::empty()),
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!("open journal {:?}", self.path)))
            }
        };

        let mut entries: BTreeMap<String, V> = BTreeMap::new();
        let mut lines = 0usize;
        let mut corrupt = 0usize;

        for (idx, raw) in BufReader::new(f).split(b'\n').enumerate() {
            let raw = raw.with_context(|| format!("read journal {:?}", self.path))?;
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            lines += 1;
            match decode_line::<V>(&raw) {
                Ok((key, Some(value))) => {
                    entries.insert(key, value);
                }
                Ok((key, None)) => {
                    entries.remove(&key);
                }
                Err(reason) => {
                    corrupt += 1;
                    warn!(
                        path = ?self.path,
                        line = idx + 1,
                        reason = %reason,
                        "skipping unreadable journal record"
                    );
                }
            }
        }

        Ok(LoadReport {
            entries,
            lines,
            corrupt,
        })
    }

    fn lock(&self) -> MutexGuard<'_, JournalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> KvStore<V> for JournalStore<V>
where
    V: Serialize + DeserializeOwned,
{
    fn load_all(&self) -> Result<LoadReport<V>> {
        let _guard = self.lock();
        self.replay()
    }

    fn put(&self, key: &str, value: &V) -> Result<()> {
        self.append(key, Some(value))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.append(key, None)
    }
}

/// A crash mid-append can leave the last line without its newline; the next
/// append would then be glued onto the torn record. Close it off first.
///
/// The torn line is skipped on replay, so a torn removal leaves the key's
/// previous value live. The key is logged when it can be read.
fn terminate_torn_tail(path: &Path) -> Result<()> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(anyhow::Error::new(e).context(format!("read journal {:?}", path))),
    };
    if bytes.last().is_some_and(|b| *b != b'\n') {
        let mut f = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("open journal {:?}", path))?;
        f.write_all(b"\n")
            .with_context(|| format!("terminate journal {:?}", path))?;
        let start = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
        match torn_key(&bytes[start..]) {
            Some(key) => warn!(
                path = ?path,
                key = %key,
                "journal ended mid-record; torn tail closed off, key keeps its previous value"
            ),
            None => warn!(path = ?path, "journal ended mid-record; torn tail closed off"),
        }
    }
    Ok(())
}

/// Key of a partially written line, if the key itself made it to disk.
fn torn_key(tail: &[u8]) -> Option<String> {
    let rest = tail.strip_prefix(br#"{"key":"#)?;
    serde_json::Deserializer::from_slice(rest)
        .into_iter::<String>()
        .next()?
        .ok()
}

fn encode_line<V: Serialize>(key: &str, value: Option<&V>) -> Result<String> {
    serde_json::to_string(&JournalLine { key, value }).context("encode journal line failed")
}

fn decode_line<V: DeserializeOwned>(raw: &[u8]) -> std::result::Result<(String, Option<V>), String> {
    let mut v: Value = serde_json::from_slice(raw).map_err(|e| format!("invalid json: {e}"))?;
    let key = v
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing key".to_string())?
        .to_string();
    match v.get_mut("value").map(Value::take) {
        None => Err(format!("missing value for key {key}")),
        Some(Value::Null) => Ok((key, None)),
        Some(val) => serde_json::from_value(val)
            .map(|decoded| (key.clone(), Some(decoded)))
            .map_err(|e| format!("undecodable value for key {key}: {e}")),
    }
}
