//! Submission runtime: owns one tokio task per unresolved token.
//!
//! Each task loops `engine.submit` and sleeps out the retry delay between
//! attempts, so the retry timer belongs to the task and dies with it.
//! `discard` aborts the task and purges the record under the task lock; a
//! pending timer can therefore never resurrect a purged operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cvg_execution::{
    AttemptOutcome, LedgerError, RecordOutcome, SubmissionEngine, SubmissionLedger, Transport,
};
use cvg_schemas::Operation;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::settings::SubmissionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    Spawned,
    AlreadyRunning,
    Settled,
    Unknown,
}

struct TaskSlot {
    id: u64,
    handle: JoinHandle<()>,
}

type TaskMap = Arc<Mutex<HashMap<String, TaskSlot>>>;

pub struct SubmissionRuntime {
    engine: Arc<SubmissionEngine>,
    tasks: TaskMap,
    next_task_id: AtomicU64,
}

impl std::fmt::Debug for SubmissionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionRuntime")
            .field("tasks", &lock(&self.tasks).len())
            .finish()
    }
}

impl SubmissionRuntime {
    pub fn new(
        ledger: Arc<SubmissionLedger>,
        transport: Arc<dyn Transport>,
        settings: SubmissionSettings,
    ) -> Self {
        let engine = SubmissionEngine::new(
            ledger,
            transport,
            settings.policy,
            settings.attempt_timeout,
        );
        Self {
            engine: Arc::new(engine),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_task_id: AtomicU64::new(1),
        }
    }

    pub fn ledger(&self) -> &Arc<SubmissionLedger> {
        self.engine.ledger()
    }

    pub fn engine(&self) -> &Arc<SubmissionEngine> {
        &self.engine
    }

    /// Record a new operation under a fresh token and start delivering it.
    pub fn submit(&self, endpoint: &str, payload: Value) -> Result<Operation, LedgerError> {
        let token = Uuid::new_v4().to_string();
        self.submit_with_token(&token, endpoint, payload)
            .map(|rec| rec.operation().clone())
    }

    /// Record under a caller-supplied token.
    ///
    /// A known token is not re-recorded. It is driven again only if still
    /// unresolved and not already running; a failed token stays failed.
    pub fn submit_with_token(
        &self,
        token: &str,
        endpoint: &str,
        payload: Value,
    ) -> Result<RecordOutcome, LedgerError> {
        let rec = self
            .ledger()
            .record(Operation::new(token, endpoint, payload))?;
        match &rec {
            RecordOutcome::Recorded(_) => {
                info!(token, endpoint, "operation recorded");
                self.drive(token);
            }
            RecordOutcome::AlreadyRecorded(op) if !op.is_settled() => {
                self.drive(token);
            }
            RecordOutcome::AlreadyRecorded(op) => {
                debug!(token, status = %op.status, "token already settled; nothing to send");
            }
        }
        Ok(rec)
    }

    /// Ensure a delivery task exists for `token`.
    ///
    /// The ledger is consulted under the task lock, so a concurrent
    /// `discard` either sees the new slot or leaves no record to drive.
    pub fn drive(&self, token: &str) -> DriveOutcome {
        let mut tasks = lock(&self.tasks);
        match self.ledger().get(token) {
            None => return DriveOutcome::Unknown,
            Some(op) if op.is_settled() => return DriveOutcome::Settled,
            Some(_) => {}
        }

        if let Some(slot) = tasks.get(token) {
            if !slot.handle.is_finished() {
                return DriveOutcome::AlreadyRunning;
            }
        }

        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(delivery_loop(
            Arc::clone(&self.engine),
            Arc::clone(&self.tasks),
            token.to_string(),
            id,
        ));
        tasks.insert(token.to_string(), TaskSlot { id, handle });
        DriveOutcome::Spawned
    }

    pub fn is_running(&self, token: &str) -> bool {
        lock(&self.tasks)
            .get(token)
            .is_some_and(|slot| !slot.handle.is_finished())
    }

    pub fn running(&self) -> usize {
        lock(&self.tasks)
            .values()
            .filter(|slot| !slot.handle.is_finished())
            .count()
    }

    /// Cancel any attempt or pending retry for `token`, then purge it.
    ///
    /// Slot removal, abort and purge happen under the task lock. A `drive`
    /// racing with this call finds either the old slot or no record.
    pub async fn discard(&self, token: &str) -> Result<Option<Operation>, LedgerError> {
        let (slot, purged) = {
            let mut tasks = lock(&self.tasks);
            let slot = tasks.remove(token);
            if let Some(slot) = &slot {
                slot.handle.abort();
            }
            // On failure the record stays and the next resume picks it up.
            let purged = self.ledger().purge(token)?;
            (slot, purged)
        };

        if let Some(slot) = slot {
            // The record is gone, so a late `resolve` from this task is a no-op.
            let _ = slot.handle.await;
            debug!(token, "delivery task cancelled");
        }
        if purged.is_some() {
            info!(token, "operation discarded");
        }
        Ok(purged)
    }

    /// Wait until `token` is confirmed or failed.
    ///
    /// Returns `None` if the token is unknown, or is purged while waiting.
    pub async fn settled(&self, token: &str) -> Option<Operation> {
        let mut rx = self.ledger().subscribe();
        loop {
            match self.ledger().get(token) {
                None => return None,
                Some(op) if op.is_settled() => return Some(op),
                Some(_) => {}
            }
            loop {
                match rx.recv().await {
                    Ok(op) if op.token == token && op.is_settled() => return Some(op),
                    Ok(op) if op.token == token => {}
                    // Another token: only re-check if ours may have been purged.
                    Ok(_) if self.is_running(token) => continue,
                    Ok(_) => break,
                    Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => return self.ledger().get(token),
                }
            }
        }
    }

    /// Abort every delivery task. Records stay as they are; the next
    /// `resume` picks them up.
    pub async fn shutdown(&self) {
        let slots: Vec<(String, TaskSlot)> = lock(&self.tasks).drain().collect();
        let n = slots.len();
        for (_, slot) in &slots {
            slot.handle.abort();
        }
        for (_, slot) in slots {
            let _ = slot.handle.await;
        }
        info!(tasks = n, "submission runtime shut down");
    }
}

async fn delivery_loop(engine: Arc<SubmissionEngine>, tasks: TaskMap, token: String, id: u64) {
    loop {
        match engine.submit(&token).await {
            AttemptOutcome::RetryAfter(op, delay) => {
                debug!(
                    token = %token,
                    attempt = op.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    "retry scheduled"
                );
                tokio::time::sleep(delay).await;
            }
            AttemptOutcome::InFlight => {
                warn!(token = %token, "attempt claimed elsewhere; task exiting");
                break;
            }
            AttemptOutcome::Confirmed(_) | AttemptOutcome::Failed(_) | AttemptOutcome::Unknown => {
                break
            }
        }
    }

    let mut tasks = lock(&tasks);
    if tasks.get(&token).is_some_and(|slot| slot.id == id) {
        tasks.remove(&token);
    }
}

fn lock(tasks: &TaskMap) -> MutexGuard<'_, HashMap<String, TaskSlot>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}
