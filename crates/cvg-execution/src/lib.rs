//! cvg-execution
//!
//! Idempotent submission core:
//! - `transport`: the boundary the engine sends through
//! - `classifier`: transport outcome → {success, duplicate-confirmed, transient, terminal}
//! - `retry`: bounded retry policy
//! - `ledger`: durable per-token state machine
//! - `engine`: one claimed, classified, recorded attempt per call
//!
//! Timers and task ownership live one layer up, in `cvg-runtime`.

mod classifier;
mod engine;
mod ledger;
mod retry;
mod transport;

pub use classifier::{classify, FaultClass, Outcome};
pub use engine::{AttemptOutcome, SubmissionEngine};
pub use ledger::{
    check_transition, BeginAttempt, LedgerError, RecordOutcome, Resolution, SubmissionLedger,
    TransitionError,
};
pub use retry::{Backoff, RetryDecision, RetryPolicy};
pub use transport::{DeliveryRequest, DeliveryResponse, Transport, TransportError};
