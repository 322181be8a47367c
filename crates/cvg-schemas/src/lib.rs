//! cvg-schemas
//!
//! Shared data model for the submission ledger and the reconciliation map.
//! Plain serde types; no IO and no behaviour beyond small helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Lifecycle status of one [`Operation`].
///
/// `Pending` is initial, `Retrying` is the only self-looping state, and
/// `Confirmed` / `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Retrying,
    Confirmed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Retrying => "RETRYING",
            OperationStatus::Confirmed => "CONFIRMED",
            OperationStatus::Failed => "FAILED",
        }
    }

    /// Case-insensitive parse of the `as_str` form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(OperationStatus::Pending),
            "RETRYING" => Some(OperationStatus::Retrying),
            "CONFIRMED" => Some(OperationStatus::Confirmed),
            "FAILED" => Some(OperationStatus::Failed),
            _ => None,
        }
    }

    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Confirmed | OperationStatus::Failed)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical write request, keyed by its idempotency token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Globally unique idempotency token. Never reused.
    pub token: String,
    /// Remote endpoint the payload is delivered to (e.g. `"/orders"`).
    pub endpoint: String,
    /// Domain data. Immutable after creation.
    pub payload: Value,
    pub status: OperationStatus,
    /// Number of delivery attempts started so far, across restarts.
    pub attempt_count: u32,
    /// Display/ordering only; never used for correctness.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Most recent failure reason, if any.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Remote receipt cached on confirmation.
    #[serde(default)]
    pub receipt: Option<Value>,
}

impl Operation {
    /// Create a new operation in the `Pending` state with zero attempts.
    pub fn new(token: impl Into<String>, endpoint: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            token: token.into(),
            endpoint: endpoint.into(),
            payload,
            status: OperationStatus::Pending,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
            receipt: None,
        }
    }

    /// `true` once the operation is `Confirmed` or `Failed`.
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Entity events and snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    /// Tombstone. Retained, never removed.
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }
}

/// A state-change notification as delivered by the event source.
///
/// `version_time` is the upstream logical timestamp of the mutation, not the
/// time the notification was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub entity_id: String,
    pub version_time: i64,
    pub kind: EventKind,
    #[serde(default)]
    pub body: Value,
}

impl EntityEvent {
    pub fn new(
        entity_id: impl Into<String>,
        version_time: i64,
        kind: EventKind,
        body: Value,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            version_time,
            kind,
            body,
        }
    }
}

/// Current accepted truth for one remote entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: String,
    pub version_time: i64,
    pub kind: EventKind,
    #[serde(default)]
    pub body: Value,
}

impl EntitySnapshot {
    pub fn from_event(ev: &EntityEvent) -> Self {
        Self {
            entity_id: ev.entity_id.clone(),
            version_time: ev.version_time,
            kind: ev.kind,
            body: ev.body.clone(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind == EventKind::Deleted
    }
}
