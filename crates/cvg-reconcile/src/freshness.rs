//! Per-entity freshness comparator.
//!
//! # Invariants
//!
//! - **Strictly newer wins**: an event replaces the stored snapshot only if its
//!   `version_time` is strictly greater.
//! - **Equal is already seen**: no secondary tie-break. The first arrival at a
//!   given `version_time` stays.
//! - **Kind-blind**: a tombstone compares like any other snapshot, so it blocks
//!   older events and yields to newer ones.
//! - **Pure, no IO**.

use cvg_schemas::{EntityEvent, EntitySnapshot};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Freshness decision
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "freshness", rename_all = "snake_case")]
pub enum Freshness {
    /// No snapshot yet, or the event is strictly newer.
    Newer,
    /// Event is older than what is stored.
    Stale { stored: i64, got: i64 },
    /// Event carries the stored `version_time` (duplicate or tie).
    AlreadySeen { version: i64 },
}

impl Freshness {
    pub fn is_newer(&self) -> bool {
        matches!(self, Freshness::Newer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Newer => "newer",
            Freshness::Stale { .. } => "stale",
            Freshness::AlreadySeen { .. } => "already_seen",
        }
    }
}

/// Compare an incoming event against the stored snapshot for its entity.
pub fn check(stored: Option<&EntitySnapshot>, ev: &EntityEvent) -> Freshness {
    let Some(stored) = stored else {
        return Freshness::Newer;
    };
    if ev.version_time > stored.version_time {
        Freshness::Newer
    } else if ev.version_time == stored.version_time {
        Freshness::AlreadySeen {
            version: stored.version_time,
        }
    } else {
        Freshness::Stale {
            stored: stored.version_time,
            got: ev.version_time,
        }
    }
}
