//! cvg-testkit
//!
//! Test collaborators for the submission engine and the reconciler:
//! - [`IdempotentBackend`]: remote side that dedupes by token
//! - [`ChaosTransport`]: scripted and seeded fault injection in front of it
//! - [`permutations`] / [`shuffled`]: delivery orders for event streams
//! - [`memory_ledger`]: ledger over a shared in-memory store

mod backend;
mod chaos;
mod shuffle;

pub use backend::{Effect, IdempotentBackend};
pub use chaos::{ChaosTransport, Fault, FaultProfile};
pub use shuffle::{permutations, shuffled};

use std::sync::Arc;

use cvg_db::MemoryStore;
use cvg_execution::{LedgerError, SubmissionLedger};
use cvg_schemas::Operation;

/// Ledger over a shared in-memory store. Call again with the same store to
/// simulate a restart.
pub fn memory_ledger(store: &MemoryStore<Operation>) -> Result<Arc<SubmissionLedger>, LedgerError> {
    SubmissionLedger::open(Arc::new(store.clone())).map(Arc::new)
}
