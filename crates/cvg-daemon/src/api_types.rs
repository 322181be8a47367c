//! Request and response bodies for the `/v1` API.

use cvg_audit::ActivityEntry;
use cvg_schemas::{EntityEvent, EntitySnapshot, Operation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub endpoint: String,
    #[serde(default)]
    pub payload: Value,
    /// Caller-chosen idempotency token. Minted server-side when absent.
    #[serde(default)]
    pub token: Option<String>,
}

impl SubmitRequest {
    /// Field checks only; never consults the ledger.
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.trim().is_empty() {
            return Err("endpoint must not be empty".to_string());
        }
        if !self.endpoint.starts_with('/') {
            return Err(format!("endpoint must start with '/': {}", self.endpoint));
        }
        if self.token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err("token must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    /// False when the token was already known; `operation` is then the
    /// existing record, unchanged.
    pub created: bool,
    pub operation: Operation,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationsResponse {
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscardResponse {
    pub token: String,
    pub discarded: Operation,
}

// ---------------------------------------------------------------------------
// Events / entities
// ---------------------------------------------------------------------------

pub fn validate_event(ev: &EntityEvent) -> Result<(), String> {
    if ev.entity_id.trim().is_empty() {
        return Err("entity_id must not be empty".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyEventResponse {
    pub entity_id: String,
    pub applied: bool,
    /// Replacement sequence number, set when applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// "stale" | "already_seen", set when discarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discarded: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitiesResponse {
    pub entities: Vec<EntitySnapshot>,
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityResponse {
    pub capacity: usize,
    pub entries: Vec<ActivityEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvg_schemas::EventKind;
    use serde_json::json;

    fn req(endpoint: &str, token: Option<&str>) -> SubmitRequest {
        SubmitRequest {
            endpoint: endpoint.to_string(),
            payload: json!({}),
            token: token.map(str::to_string),
        }
    }

    #[test]
    fn submit_request_field_checks() {
        assert!(req("/orders", None).validate().is_ok());
        assert!(req("/orders", Some("K1")).validate().is_ok());
        assert!(req("", None).validate().is_err());
        assert!(req("orders", None).validate().is_err());
        assert!(req("/orders", Some(" ")).validate().is_err());
    }

    #[test]
    fn event_needs_an_entity_id() {
        let ev = EntityEvent::new("", 1, EventKind::Created, json!(null));
        assert!(validate_event(&ev).is_err());
        let ev = EntityEvent::new("E1", 1, EventKind::Created, json!(null));
        assert!(validate_event(&ev).is_ok());
    }
}
