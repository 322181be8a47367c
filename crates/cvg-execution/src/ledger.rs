//! Submission Ledger
//!
//! # Design
//!
//! Durable record of every operation keyed by idempotency token. At most one
//! record per token. Every status change goes through [`check_transition`],
//! which enforces:
//!
//! ```text
//!   Pending ──► Retrying ──┐ (transient, attempt_count < max)
//!      │           ▲  │    │
//!      │           └──┼────┘
//!      │              ├──► Confirmed (term.)
//!      ├──────────────┼──► Confirmed (term.)
//!      └──────────────┴──► Failed    (term.)
//! ```
//!
//! No transition leaves a terminal state.
//!
//! # Attempt accounting
//!
//! [`SubmissionLedger::begin_attempt`] increments `attempt_count` and writes
//! it to the store *before* the send. A crash mid-send therefore still counts
//! the attempt, and a restart cannot grant extra budget.
//!
//! # Persistence failures
//!
//! `record` refuses to accept an operation it cannot persist. Later
//! transitions that fail to persist are logged and applied in memory only; the
//! next successful write for the token carries the full record again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use cvg_db::KvStore;
use cvg_schemas::{Operation, OperationStatus};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::classifier::Outcome;
use crate::retry::{RetryDecision, RetryPolicy};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Returned when a status change is not legal from the current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub token: String,
    pub from: OperationStatus,
    pub to: OperationStatus,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal ledger transition for {}: {} -> {}",
            self.token, self.from, self.to
        )
    }
}

impl std::error::Error for TransitionError {}

/// Legal moves of the operation state machine.
pub fn check_transition(
    token: &str,
    from: OperationStatus,
    to: OperationStatus,
) -> Result<(), TransitionError> {
    use OperationStatus::*;
    let ok = matches!(
        (from, to),
        (Pending, Retrying)
            | (Pending, Confirmed)
            | (Pending, Failed)
            | (Retrying, Retrying)
            | (Retrying, Confirmed)
            | (Retrying, Failed)
    );
    if ok {
        Ok(())
    } else {
        Err(TransitionError {
            token: token.to_string(),
            from,
            to,
        })
    }
}

// ---------------------------------------------------------------------------
// LedgerError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No record for this token (never recorded, or purged).
    Unknown(String),
    Transition(TransitionError),
    /// The backing store refused the write.
    Persistence(String),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Unknown(t) => write!(f, "unknown token: {t}"),
            LedgerError::Transition(e) => e.fmt(f),
            LedgerError::Persistence(m) => write!(f, "ledger persistence failed: {m}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<TransitionError> for LedgerError {
    fn from(e: TransitionError) -> Self {
        LedgerError::Transition(e)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(Operation),
    /// Token already known; the stored record is returned untouched.
    AlreadyRecorded(Operation),
}

impl RecordOutcome {
    pub fn operation(&self) -> &Operation {
        match self {
            RecordOutcome::Recorded(op) | RecordOutcome::AlreadyRecorded(op) => op,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BeginAttempt {
    /// Caller owns the attempt; `attempt_count` already includes it.
    Proceed(Operation),
    /// Another attempt for this token is outstanding.
    InFlight,
    /// Terminal; nothing to send.
    Settled(Operation),
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Confirmed(Operation),
    Failed(Operation),
    RetryAfter(Operation, Duration),
}

impl Resolution {
    pub fn operation(&self) -> &Operation {
        match self {
            Resolution::Confirmed(op) | Resolution::Failed(op) | Resolution::RetryAfter(op, _) => {
                op
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SubmissionLedger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerInner {
    records: HashMap<String, Operation>,
    in_flight: HashSet<String>,
}

pub struct SubmissionLedger {
    inner: Mutex<LedgerInner>,
    store: Arc<dyn KvStore<Operation>>,
    updates: broadcast::Sender<Operation>,
    corrupt_on_load: usize,
}

impl std::fmt::Debug for SubmissionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionLedger")
            .field("records", &self.lock().records.len())
            .field("corrupt_on_load", &self.corrupt_on_load)
            .finish()
    }
}

impl SubmissionLedger {
    /// Load every record from `store`. Unreadable records were already
    /// dropped by the store; their count is kept for diagnostics.
    pub fn open(store: Arc<dyn KvStore<Operation>>) -> Result<Self, LedgerError> {
        let report = store
            .load_all()
            .map_err(|e| LedgerError::Persistence(format!("{e:#}")))?;
        if report.corrupt > 0 {
            warn!(
                corrupt = report.corrupt,
                "ledger loaded with unreadable records dropped"
            );
        }

        let mut records = HashMap::with_capacity(report.entries.len());
        for (key, op) in report.entries {
            if key != op.token {
                warn!(key = %key, token = %op.token, "ledger record keyed under foreign token; skipped");
                continue;
            }
            records.insert(key, op);
        }
        debug!(records = records.len(), "ledger opened");

        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Mutex::new(LedgerInner {
                records,
                in_flight: HashSet::new(),
            }),
            store,
            updates,
            corrupt_on_load: report.corrupt,
        })
    }

    pub fn corrupt_on_load(&self) -> usize {
        self.corrupt_on_load
    }

    /// Every persisted change is published here after it is applied.
    pub fn subscribe(&self) -> broadcast::Receiver<Operation> {
        self.updates.subscribe()
    }

    /// Insert a new `Pending` record, or return the existing one for the token.
    pub fn record(&self, op: Operation) -> Result<RecordOutcome, LedgerError> {
        let mut inner = self.lock();
        if let Some(existing) = inner.records.get(&op.token) {
            return Ok(RecordOutcome::AlreadyRecorded(existing.clone()));
        }
        if op.status != OperationStatus::Pending {
            return Err(TransitionError {
                token: op.token.clone(),
                from: op.status,
                to: OperationStatus::Pending,
            }
            .into());
        }
        self.store
            .put(&op.token, &op)
            .map_err(|e| LedgerError::Persistence(format!("{e:#}")))?;
        inner.records.insert(op.token.clone(), op.clone());
        drop(inner);

        self.publish(&op);
        Ok(RecordOutcome::Recorded(op))
    }

    /// Claim the next delivery attempt for `token`.
    ///
    /// When the budget was already spent (e.g. a crash after the last
    /// increment), the record is failed here instead of sending again.
    pub fn begin_attempt(&self, token: &str, policy: &RetryPolicy) -> BeginAttempt {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let Some(op) = inner.records.get_mut(token) else {
            return BeginAttempt::Unknown;
        };
        if op.is_settled() {
            return BeginAttempt::Settled(op.clone());
        }
        if inner.in_flight.contains(token) {
            return BeginAttempt::InFlight;
        }

        if policy.is_exhausted(op.attempt_count) {
            op.status = OperationStatus::Failed;
            op.updated_at = Utc::now();
            op.last_error = Some(format!(
                "attempt budget exhausted ({} of {})",
                op.attempt_count, policy.max_attempts
            ));
            let snapshot = op.clone();
            self.persist(&snapshot);
            self.publish(&snapshot);
            return BeginAttempt::Settled(snapshot);
        }

        op.attempt_count += 1;
        op.updated_at = Utc::now();
        let snapshot = op.clone();
        inner.in_flight.insert(token.to_string());
        self.persist(&snapshot);
        BeginAttempt::Proceed(snapshot)
    }

    /// Apply the classified outcome of the attempt started by `begin_attempt`.
    pub fn resolve(
        &self,
        token: &str,
        outcome: &Outcome,
        policy: &RetryPolicy,
    ) -> Result<Resolution, LedgerError> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        inner.in_flight.remove(token);
        let op = inner
            .records
            .get_mut(token)
            .ok_or_else(|| LedgerError::Unknown(token.to_string()))?;

        let (next, delay) = match outcome {
            Outcome::Success { .. } | Outcome::DuplicateConfirmed { .. } => {
                (OperationStatus::Confirmed, None)
            }
            Outcome::Terminal { .. } => (OperationStatus::Failed, None),
            Outcome::Transient { .. } => match policy.decide(op.attempt_count) {
                RetryDecision::Exhausted => (OperationStatus::Failed, None),
                RetryDecision::RetryAfter(d) => (OperationStatus::Retrying, Some(d)),
            },
        };
        check_transition(token, op.status, next)?;

        op.status = next;
        op.updated_at = Utc::now();
        if let Some(receipt) = outcome.receipt() {
            op.receipt = Some(receipt.clone());
        }
        if let Some(reason) = outcome.reason() {
            op.last_error = Some(reason.to_string());
        }
        let snapshot = op.clone();
        self.persist(&snapshot);
        self.publish(&snapshot);

        Ok(match (next, delay) {
            (OperationStatus::Confirmed, _) => Resolution::Confirmed(snapshot),
            (OperationStatus::Retrying, Some(d)) => Resolution::RetryAfter(snapshot, d),
            _ => Resolution::Failed(snapshot),
        })
    }

    /// Drop the in-flight claim without resolving (attempt abandoned).
    pub fn release(&self, token: &str) {
        self.lock().in_flight.remove(token);
    }

    pub fn is_in_flight(&self, token: &str) -> bool {
        self.lock().in_flight.contains(token)
    }

    pub fn get(&self, token: &str) -> Option<Operation> {
        self.lock().records.get(token).cloned()
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<Operation> {
        let mut ops: Vec<_> = self.lock().records.values().cloned().collect();
        sort_by_age(&mut ops);
        ops
    }

    /// `Pending` and `Retrying` records, oldest first.
    pub fn unresolved(&self) -> Vec<Operation> {
        let mut ops: Vec<_> = self
            .lock()
            .records
            .values()
            .filter(|op| !op.is_settled())
            .cloned()
            .collect();
        sort_by_age(&mut ops);
        ops
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operator-initiated removal. Returns the removed record, if any.
    ///
    /// Callers holding a retry timer for this token must cancel it first.
    pub fn purge(&self, token: &str) -> Result<Option<Operation>, LedgerError> {
        let mut inner = self.lock();
        if !inner.records.contains_key(token) {
            return Ok(None);
        }
        self.store
            .remove(token)
            .map_err(|e| LedgerError::Persistence(format!("{e:#}")))?;
        inner.in_flight.remove(token);
        Ok(inner.records.remove(token))
    }

    /// Remove every terminal record. Returns the purged tokens, sorted.
    pub fn purge_settled(&self) -> Result<Vec<String>, LedgerError> {
        let mut inner = self.lock();
        let mut settled: Vec<String> = inner
            .records
            .values()
            .filter(|op| op.is_settled())
            .map(|op| op.token.clone())
            .collect();
        settled.sort();

        let mut purged = Vec::with_capacity(settled.len());
        for token in settled {
            self.store
                .remove(&token)
                .map_err(|e| LedgerError::Persistence(format!("{e:#}")))?;
            inner.records.remove(&token);
            purged.push(token);
        }
        Ok(purged)
    }

    fn persist(&self, op: &Operation) {
        if let Err(e) = self.store.put(&op.token, op) {
            error!(
                token = %op.token,
                status = %op.status,
                error = %format!("{e:#}"),
                "ledger transition not persisted; continuing in memory"
            );
        }
    }

    fn publish(&self, op: &Operation) {
        // No subscribers is fine.
        let _ = self.updates.send(op.clone());
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sort_by_age(ops: &mut [Operation]) {
    ops.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.token.cmp(&b.token))
    });
}

// ---------------------------------------------------------------------------
// Internal unit tests
// ---------------------------------------------------------------------------
