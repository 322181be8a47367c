//! Fault-injecting transport in front of an [`IdempotentBackend`].
//!
//! Faults come from a per-token script first, then from a seeded random
//! profile. Same seed and same call order give the same faults.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cvg_execution::{DeliveryRequest, DeliveryResponse, Transport, TransportError};

use crate::backend::IdempotentBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Pass through to the backend.
    Deliver,
    /// Not delivered; remote answers "try later".
    Unavailable,
    /// Delivered and applied, but the response is lost on the way back.
    LostAck,
    /// Not delivered; the client sees a timeout.
    Timeout,
    /// Not delivered; terminal rejection with this reason.
    Reject(String),
    /// Never answers. Only the engine's attempt timeout ends the call.
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultProfile {
    pub unavailable_rate: f64,
    pub lost_ack_rate: f64,
    pub timeout_rate: f64,
    pub seed: u64,
}

impl FaultProfile {
    pub fn reliable() -> Self {
        Self {
            unavailable_rate: 0.0,
            lost_ack_rate: 0.0,
            timeout_rate: 0.0,
            seed: 0,
        }
    }

    pub fn flaky(seed: u64) -> Self {
        Self {
            unavailable_rate: 0.2,
            lost_ack_rate: 0.2,
            timeout_rate: 0.1,
            seed,
        }
    }

    fn pick(&self, rng: &mut fastrand::Rng) -> Fault {
        let r = rng.f64();
        if r < self.unavailable_rate {
            Fault::Unavailable
        } else if r < self.unavailable_rate + self.lost_ack_rate {
            Fault::LostAck
        } else if r < self.unavailable_rate + self.lost_ack_rate + self.timeout_rate {
            Fault::Timeout
        } else {
            Fault::Deliver
        }
    }
}

#[derive(Debug)]
struct ChaosState {
    rng: fastrand::Rng,
    scripts: HashMap<String, VecDeque<Fault>>,
    calls: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct ChaosTransport {
    backend: Arc<IdempotentBackend>,
    profile: FaultProfile,
    state: Mutex<ChaosState>,
}

impl ChaosTransport {
    pub fn new(backend: Arc<IdempotentBackend>, profile: FaultProfile) -> Self {
        Self {
            backend,
            profile,
            state: Mutex::new(ChaosState {
                rng: fastrand::Rng::with_seed(profile.seed),
                scripts: HashMap::new(),
                calls: HashMap::new(),
            }),
        }
    }

    /// Queue faults for the next sends of `token`, ahead of the profile.
    pub fn script(&self, token: &str, faults: impl IntoIterator<Item = Fault>) {
        self.lock()
            .scripts
            .entry(token.to_string())
            .or_default()
            .extend(faults);
    }

    /// Sends observed for `token`, whatever their fate.
    pub fn calls(&self, token: &str) -> usize {
        self.lock().calls.get(token).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    pub fn backend(&self) -> &Arc<IdempotentBackend> {
        &self.backend
    }

    fn next_fault(&self, token: &str) -> Fault {
        let mut st = self.lock();
        *st.calls.entry(token.to_string()).or_default() += 1;
        if let Some(f) = st.scripts.get_mut(token).and_then(VecDeque::pop_front) {
            return f;
        }
        self.profile.pick(&mut st.rng)
    }

    fn lock(&self) -> MutexGuard<'_, ChaosState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for ChaosTransport {
    async fn send(&self, req: DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
        match self.next_fault(&req.token) {
            Fault::Deliver => Ok(self.backend.handle(&req)),
            Fault::Unavailable => Ok(DeliveryResponse::Unavailable {
                reason: "injected: service unavailable".into(),
            }),
            Fault::LostAck => {
                let _ = self.backend.handle(&req);
                Err(TransportError::Io("injected: connection reset after write".into()))
            }
            Fault::Timeout => Err(TransportError::Timeout),
            Fault::Reject(reason) => Ok(DeliveryResponse::Rejected { reason }),
            Fault::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(token: &str) -> DeliveryRequest {
        DeliveryRequest {
            endpoint: "/e".into(),
            token: token.into(),
            body: json!(null),
        }
    }

    #[tokio::test]
    async fn lost_ack_applies_the_write() {
        let backend = Arc::new(IdempotentBackend::new());
        let chaos = ChaosTransport::new(backend.clone(), FaultProfile::reliable());
        chaos.script("K1", [Fault::LostAck]);

        assert!(chaos.send(req("K1")).await.is_err());
        assert_eq!(backend.effect_count("K1"), 1);
        assert!(matches!(
            chaos.send(req("K1")).await,
            Ok(DeliveryResponse::Replayed { .. })
        ));
        assert_eq!(chaos.calls("K1"), 2);
    }

    #[tokio::test]
    async fn same_seed_same_faults() {
        let run = |seed| async move {
            let chaos =
                ChaosTransport::new(Arc::new(IdempotentBackend::new()), FaultProfile::flaky(seed));
            let mut out = Vec::new();
            for i in 0..32 {
                out.push(chaos.send(req(&format!("t{i}"))).await.is_ok());
            }
            out
        };
        assert_eq!(run(7).await, run(7).await);
    }
}
