//! In-process idempotency backend.
//!
//! Keys accepted operations by token and replays the original receipt for a
//! known token instead of reapplying. Rejections are not remembered, so a
//! rejected token sent again is validated again.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cvg_execution::{DeliveryRequest, DeliveryResponse, Transport, TransportError};
use serde_json::{json, Value};

type Validator = Box<dyn Fn(&DeliveryRequest) -> Result<(), String> + Send + Sync>;

/// One applied side effect.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub token: String,
    pub endpoint: String,
    pub body: Value,
}

#[derive(Debug, Default)]
struct BackendState {
    receipts: HashMap<String, Value>,
    effects: Vec<Effect>,
    replays: usize,
    rejections: usize,
}

#[derive(Default)]
pub struct IdempotentBackend {
    state: Mutex<BackendState>,
    validator: Option<Validator>,
}

impl std::fmt::Debug for IdempotentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotentBackend")
            .field("state", &*self.lock())
            .finish()
    }
}

impl IdempotentBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any request for which `f` returns `Err(reason)`.
    pub fn with_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&DeliveryRequest) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Box::new(f));
        self
    }

    /// Apply or replay one request.
    pub fn handle(&self, req: &DeliveryRequest) -> DeliveryResponse {
        let mut st = self.lock();
        if let Some(receipt) = st.receipts.get(&req.token) {
            let receipt = receipt.clone();
            st.replays += 1;
            return DeliveryResponse::Replayed { receipt };
        }
        if let Some(validate) = &self.validator {
            if let Err(reason) = validate(req) {
                st.rejections += 1;
                return DeliveryResponse::Rejected { reason };
            }
        }

        st.effects.push(Effect {
            token: req.token.clone(),
            endpoint: req.endpoint.clone(),
            body: req.body.clone(),
        });
        let receipt = json!({
            "receipt_id": format!("rcpt-{}", st.effects.len()),
            "token": req.token,
        });
        st.receipts.insert(req.token.clone(), receipt.clone());
        DeliveryResponse::Accepted { receipt }
    }

    /// Times the remote side actually applied `token`. Never more than one.
    pub fn effect_count(&self, token: &str) -> usize {
        self.lock().effects.iter().filter(|e| e.token == token).count()
    }

    pub fn effects(&self) -> Vec<Effect> {
        self.lock().effects.clone()
    }

    pub fn total_effects(&self) -> usize {
        self.lock().effects.len()
    }

    pub fn replays(&self) -> usize {
        self.lock().replays
    }

    pub fn rejections(&self) -> usize {
        self.lock().rejections
    }

    pub fn receipt(&self, token: &str) -> Option<Value> {
        self.lock().receipts.get(token).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A perfect transport straight into the backend.
#[async_trait]
impl Transport for IdempotentBackend {
    async fn send(&self, req: DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
        Ok(self.handle(&req))
    }
}
