//! Fault classifier: transport outcome → what the ledger should do.

use serde_json::Value;

use crate::transport::{DeliveryResponse, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass {
    Success,
    /// Remote side already applied this token. Idempotent success, not an error.
    DuplicateConfirmed,
    Transient,
    Terminal,
}

impl FaultClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultClass::Success => "success",
            FaultClass::DuplicateConfirmed => "duplicate_confirmed",
            FaultClass::Transient => "transient",
            FaultClass::Terminal => "terminal",
        }
    }

    pub fn is_confirmation(&self) -> bool {
        matches!(self, FaultClass::Success | FaultClass::DuplicateConfirmed)
    }
}

/// A classified attempt, carrying what the ledger needs to store.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { receipt: Value },
    DuplicateConfirmed { receipt: Value },
    Transient { reason: String },
    Terminal { reason: String },
}

impl Outcome {
    pub fn class(&self) -> FaultClass {
        match self {
            Outcome::Success { .. } => FaultClass::Success,
            Outcome::DuplicateConfirmed { .. } => FaultClass::DuplicateConfirmed,
            Outcome::Transient { .. } => FaultClass::Transient,
            Outcome::Terminal { .. } => FaultClass::Terminal,
        }
    }

    pub fn receipt(&self) -> Option<&Value> {
        match self {
            Outcome::Success { receipt } | Outcome::DuplicateConfirmed { receipt } => Some(receipt),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Transient { reason } | Outcome::Terminal { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Pure mapping; no I/O.
pub fn classify(result: Result<DeliveryResponse, TransportError>) -> Outcome {
    match result {
        Ok(DeliveryResponse::Accepted { receipt }) => Outcome::Success { receipt },
        Ok(DeliveryResponse::Replayed { receipt }) => Outcome::DuplicateConfirmed { receipt },
        Ok(DeliveryResponse::Rejected { reason }) => Outcome::Terminal { reason },
        Ok(DeliveryResponse::Unavailable { reason }) => Outcome::Transient { reason },
        Err(e) => Outcome::Transient {
            reason: e.to_string(),
        },
    }
}
