//! Idempotent Submission Engine.
//!
//! One call to [`SubmissionEngine::submit`] issues at most one network call.
//! Scheduling the next attempt belongs to the caller (see `cvg-runtime`);
//! this type only claims, sends, classifies and records.

use std::sync::Arc;
use std::time::Duration;

use cvg_schemas::{Operation, OperationStatus};
use tracing::{debug, info, warn};

use crate::classifier::{classify, Outcome};
use crate::ledger::{BeginAttempt, LedgerError, Resolution, SubmissionLedger};
use crate::retry::RetryPolicy;
use crate::transport::{DeliveryRequest, Transport, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Confirmed(Operation),
    Failed(Operation),
    /// Transient failure with budget left; call again after the delay.
    RetryAfter(Operation, Duration),
    /// Another attempt for the token is outstanding; this call did nothing.
    InFlight,
    /// No record for the token (never recorded, or purged mid-flight).
    Unknown,
}

impl AttemptOutcome {
    pub fn is_final(&self) -> bool {
        !matches!(self, AttemptOutcome::RetryAfter(..))
    }
}

pub struct SubmissionEngine {
    ledger: Arc<SubmissionLedger>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl SubmissionEngine {
    pub fn new(
        ledger: Arc<SubmissionLedger>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            transport,
            policy,
            attempt_timeout,
        }
    }

    pub fn ledger(&self) -> &Arc<SubmissionLedger> {
        &self.ledger
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one delivery attempt for a recorded, unresolved token.
    ///
    /// A settled token returns its cached record without touching the network.
    pub async fn submit(&self, token: &str) -> AttemptOutcome {
        let op = match self.ledger.begin_attempt(token, &self.policy) {
            BeginAttempt::Proceed(op) => op,
            BeginAttempt::Settled(op) => return settled(op),
            BeginAttempt::InFlight => {
                debug!(token, "attempt already in flight; skipping");
                return AttemptOutcome::InFlight;
            }
            BeginAttempt::Unknown => return AttemptOutcome::Unknown,
        };

        // Released on every exit, including cancellation of this future.
        let mut claim = InFlightClaim {
            ledger: &self.ledger,
            token,
            armed: true,
        };

        let req = DeliveryRequest {
            endpoint: op.endpoint.clone(),
            token: op.token.clone(),
            body: op.payload.clone(),
        };
        debug!(token, attempt = op.attempt_count, endpoint = %req.endpoint, "delivery attempt");

        let sent = match tokio::time::timeout(self.attempt_timeout, self.transport.send(req)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };
        let outcome = classify(sent);
        self.log_outcome(token, op.attempt_count, &outcome);

        let resolved = self.ledger.resolve(token, &outcome, &self.policy);
        // `resolve` clears the claim itself; a later release could hit a newer one.
        claim.armed = false;

        match resolved {
            Ok(Resolution::Confirmed(op)) => AttemptOutcome::Confirmed(op),
            Ok(Resolution::Failed(op)) => {
                warn!(
                    token,
                    attempts = op.attempt_count,
                    last_error = op.last_error.as_deref().unwrap_or(""),
                    "operation failed"
                );
                AttemptOutcome::Failed(op)
            }
            Ok(Resolution::RetryAfter(op, delay)) => AttemptOutcome::RetryAfter(op, delay),
            Err(LedgerError::Unknown(_)) => {
                info!(token, "operation purged while in flight; outcome dropped");
                AttemptOutcome::Unknown
            }
            Err(e) => {
                warn!(token, error = %e, "attempt outcome not applied");
                match self.ledger.get(token) {
                    Some(op) if op.is_settled() => settled(op),
                    _ => AttemptOutcome::Unknown,
                }
            }
        }
    }

    fn log_outcome(&self, token: &str, attempt: u32, outcome: &Outcome) {
        match outcome {
            Outcome::Success { .. } => info!(token, attempt, "delivery confirmed"),
            Outcome::DuplicateConfirmed { .. } => {
                info!(token, attempt, "remote side already applied token")
            }
            Outcome::Transient { reason } => {
                warn!(token, attempt, reason = %reason, "transient delivery failure")
            }
            Outcome::Terminal { reason } => {
                warn!(token, attempt, reason = %reason, "terminal delivery failure")
            }
        }
    }
}

fn settled(op: Operation) -> AttemptOutcome {
    match op.status {
        OperationStatus::Confirmed => AttemptOutcome::Confirmed(op),
        _ => AttemptOutcome::Failed(op),
    }
}

struct InFlightClaim<'a> {
    ledger: &'a SubmissionLedger,
    token: &'a str,
    armed: bool,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.ledger.release(self.token);
        }
    }
}
