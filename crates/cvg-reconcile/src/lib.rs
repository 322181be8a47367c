//! cvg-reconcile
//!
//! Last-writer-wins merge of an unordered, duplicate-prone notification
//! stream into one snapshot per entity, keyed by upstream `version_time`.

mod freshness;
mod map;
mod reconciler;

pub use freshness::{check, Freshness};
pub use map::ReconciliationMap;
pub use reconciler::{ApplyOutcome, Reconciler, SnapshotReplaced};
