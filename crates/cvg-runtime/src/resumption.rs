//! Resumption: re-enter unresolved operations after a restart.
//!
//! `attempt_count` is taken from the ledger as persisted, never reset, so a
//! restart grants no extra retry budget.

use serde::Serialize;
use tracing::info;

use crate::runtime::{DriveOutcome, SubmissionRuntime};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResumptionReport {
    /// Unresolved records found in the ledger.
    pub inspected: usize,
    /// Records a new delivery task was started for.
    pub resumed: usize,
    /// Records that already had a live task (e.g. a caller got there first).
    pub already_running: usize,
    /// Tokens resumed, oldest first.
    pub tokens: Vec<String>,
}

impl SubmissionRuntime {
    pub fn resume(&self) -> ResumptionReport {
        let mut report = ResumptionReport::default();
        for op in self.ledger().unresolved() {
            report.inspected += 1;
            match self.drive(&op.token) {
                DriveOutcome::Spawned => {
                    report.resumed += 1;
                    report.tokens.push(op.token);
                }
                DriveOutcome::AlreadyRunning => report.already_running += 1,
                // Settled or purged between the scan and the drive.
                DriveOutcome::Settled | DriveOutcome::Unknown => {}
            }
        }
        info!(
            inspected = report.inspected,
            resumed = report.resumed,
            already_running = report.already_running,
            "resumption pass complete"
        );
        report
    }
}
