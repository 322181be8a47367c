//! cvg-runtime
//!
//! Wires the submission engine to tokio: one task per unresolved token,
//! timer-driven retries, cancellation on discard, and resumption after a
//! restart. Also opens the on-disk stores shared by the daemon and the CLI.

mod resumption;
mod runtime;
mod settings;
mod stores;

pub use resumption::ResumptionReport;
pub use runtime::{DriveOutcome, SubmissionRuntime};
pub use settings::SubmissionSettings;
pub use stores::Stores;
