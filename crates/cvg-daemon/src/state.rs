//! Shared runtime state for cvg-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The background tasks
//! spawned here only forward notifications; they own no records.

use std::sync::Arc;
use std::time::Duration;

use cvg_audit::{ActivityFeed, ActivitySource};
use cvg_reconcile::{Reconciler, SnapshotReplaced};
use cvg_runtime::SubmissionRuntime;
use cvg_schemas::Operation;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

const BUS_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    OperationUpdated(Operation),
    SnapshotReplaced(SnapshotReplaced),
}

impl BusMsg {
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::OperationUpdated(_) => "operation_updated",
            BusMsg::SnapshotReplaced(_) => "snapshot_replaced",
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub runtime: Arc<SubmissionRuntime>,
    pub reconciler: Arc<Reconciler>,
    pub activity: Arc<ActivityFeed>,
}

impl AppState {
    pub fn new(
        runtime: Arc<SubmissionRuntime>,
        reconciler: Arc<Reconciler>,
        activity: Arc<ActivityFeed>,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(BUS_CAPACITY);
        Self {
            bus,
            build: BuildInfo {
                service: "cvg-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            runtime,
            reconciler,
            activity,
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Forward ledger transitions and snapshot replacements onto the bus.
///
/// Ledger transitions are also recorded in the activity feed. Raw events are
/// recorded by the ingest handler instead, because discarded events never
/// reach the reconciler's notification channel.
pub fn spawn_bridges(st: &Arc<AppState>) {
    let mut ops = st.runtime.ledger().subscribe();
    let bus = st.bus.clone();
    let activity = Arc::clone(&st.activity);
    tokio::spawn(async move {
        loop {
            match ops.recv().await {
                Ok(op) => {
                    activity.push(
                        ActivitySource::Operation,
                        op.token.clone(),
                        json!({
                            "status": op.status.as_str(),
                            "attempt_count": op.attempt_count,
                            "endpoint": op.endpoint,
                            "last_error": op.last_error,
                        }),
                    );
                    let _ = bus.send(BusMsg::OperationUpdated(op));
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "operation bridge lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut snaps = st.reconciler.subscribe();
    let bus = st.bus.clone();
    tokio::spawn(async move {
        loop {
            match snaps.recv().await {
                Ok(note) => {
                    let _ = bus.send(BusMsg::SnapshotReplaced(note));
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "snapshot bridge lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
