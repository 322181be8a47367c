//! Transport boundary.
//!
//! The engine does not assume HTTP. Anything that can tell a transient
//! failure from a terminal one can implement [`Transport`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One delivery attempt for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub endpoint: String,
    /// Idempotency token; the remote side dedupes on this.
    pub token: String,
    pub body: Value,
}

/// What the remote side said, when it said anything at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryResponse {
    /// First application of this token.
    Accepted { receipt: Value },
    /// The token was already applied; `receipt` is the original one.
    Replayed { receipt: Value },
    /// Will never succeed (validation, auth, unknown endpoint).
    Rejected { reason: String },
    /// Remote side is temporarily unable to serve (overload, 5xx).
    Unavailable { reason: String },
}

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// No usable response. Every variant is retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Connect(String),
    Io(String),
    Decode(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "transport timeout"),
            TransportError::Connect(m) => write!(f, "transport connect failed: {m}"),
            TransportError::Io(m) => write!(f, "transport io failed: {m}"),
            TransportError::Decode(m) => write!(f, "transport decode failed: {m}"),
        }
    }
}

impl std::error::Error for TransportError {}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: DeliveryRequest) -> Result<DeliveryResponse, TransportError>;
}
