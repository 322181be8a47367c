//! Axum router and all HTTP handlers for cvg-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Tests compose the bare router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use cvg_audit::ActivitySource;
use cvg_execution::{LedgerError, RecordOutcome};
use cvg_reconcile::ApplyOutcome;
use cvg_schemas::{EntityEvent, OperationStatus};
use futures_util::{Stream, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{
        validate_event, ActivityQuery, ActivityResponse, ApplyEventResponse, DiscardResponse,
        EntitiesResponse, ErrorResponse, HealthResponse, OperationsQuery, OperationsResponse,
        SubmitRequest, SubmitResponse,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/operations", get(list_operations).post(submit_operation))
        .route(
            "/v1/operations/:token",
            get(get_operation).delete(discard_operation),
        )
        .route("/v1/events", post(ingest_event))
        .route("/v1/entities/active", get(entities_active))
        .route("/v1/entities/history", get(entities_history))
        .route("/v1/activity", get(activity))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn ledger_error_response(err: LedgerError) -> Response {
    let status = match &err {
        LedgerError::Unknown(_) => StatusCode::NOT_FOUND,
        LedgerError::Transition(_) => StatusCode::CONFLICT,
        // Nothing was recorded; the caller may retry with the same token.
        LedgerError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, err.to_string())
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// /v1/operations
// ---------------------------------------------------------------------------

pub(crate) async fn list_operations(
    State(st): State<Arc<AppState>>,
    Query(q): Query<OperationsQuery>,
) -> Response {
    let filter = match q.status.as_deref() {
        None => None,
        Some(raw) => match OperationStatus::parse(raw) {
            Some(s) => Some(s),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("unknown status filter: {raw}"),
                )
            }
        },
    };

    let operations = st
        .runtime
        .ledger()
        .list()
        .into_iter()
        .filter(|op| filter.map_or(true, |s| op.status == s))
        .collect();

    (StatusCode::OK, Json(OperationsResponse { operations })).into_response()
}

pub(crate) async fn submit_operation(
    State(st): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> Response {
    if let Err(reason) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, reason);
    }

    let result = match req.token.as_deref() {
        Some(token) => st
            .runtime
            .submit_with_token(token, &req.endpoint, req.payload),
        None => st
            .runtime
            .submit(&req.endpoint, req.payload)
            .map(RecordOutcome::Recorded),
    };

    match result {
        Ok(RecordOutcome::Recorded(operation)) => {
            info!(token = %operation.token, endpoint = %operation.endpoint, "operation accepted");
            (
                StatusCode::ACCEPTED,
                Json(SubmitResponse {
                    created: true,
                    operation,
                }),
            )
                .into_response()
        }
        Ok(RecordOutcome::AlreadyRecorded(operation)) => (
            StatusCode::OK,
            Json(SubmitResponse {
                created: false,
                operation,
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "operation not recorded");
            ledger_error_response(e)
        }
    }
}

pub(crate) async fn get_operation(
    State(st): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Response {
    match st.runtime.ledger().get(&token) {
        Some(op) => (StatusCode::OK, Json(op)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("unknown token: {token}")),
    }
}

pub(crate) async fn discard_operation(
    State(st): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Response {
    match st.runtime.discard(&token).await {
        Ok(Some(discarded)) => {
            st.activity.push(
                ActivitySource::Operation,
                token.clone(),
                json!({ "discarded": true, "status": discarded.status.as_str() }),
            );
            (StatusCode::OK, Json(DiscardResponse { token, discarded })).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("unknown token: {token}")),
        Err(e) => ledger_error_response(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/events
// ---------------------------------------------------------------------------

pub(crate) async fn ingest_event(
    State(st): State<Arc<AppState>>,
    Json(ev): Json<EntityEvent>,
) -> Response {
    if let Err(reason) = validate_event(&ev) {
        return error_response(StatusCode::BAD_REQUEST, reason);
    }

    let outcome = st.reconciler.apply(&ev);
    let resp = match &outcome {
        ApplyOutcome::Replaced { seq, .. } => ApplyEventResponse {
            entity_id: ev.entity_id.clone(),
            applied: true,
            seq: Some(*seq),
            discarded: None,
        },
        ApplyOutcome::Discarded { freshness } => ApplyEventResponse {
            entity_id: ev.entity_id.clone(),
            applied: false,
            seq: None,
            discarded: Some(freshness.as_str()),
        },
    };

    st.activity.push(
        ActivitySource::Event,
        ev.entity_id.clone(),
        json!({
            "version_time": ev.version_time,
            "kind": ev.kind.as_str(),
            "applied": resp.applied,
            "discarded": resp.discarded,
        }),
    );

    (StatusCode::OK, Json(resp)).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/entities/*
// ---------------------------------------------------------------------------

pub(crate) async fn entities_active(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let entities = st.reconciler.active();
    (StatusCode::OK, Json(EntitiesResponse { entities }))
}

pub(crate) async fn entities_history(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let entities = st.reconciler.history();
    (StatusCode::OK, Json(EntitiesResponse { entities }))
}

// ---------------------------------------------------------------------------
// GET /v1/activity
// ---------------------------------------------------------------------------

pub(crate) async fn activity(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ActivityQuery>,
) -> impl IntoResponse {
    let capacity = st.activity.capacity();
    let limit = q.limit.unwrap_or(capacity).min(capacity);
    (
        StatusCode::OK,
        Json(ActivityResponse {
            capacity,
            entries: st.activity.recent(limit),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged
        }
    })
}
