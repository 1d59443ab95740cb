//! Axum router and all HTTP handlers for fts-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Scenario tests in `tests/` compose the bare router.
//!
//! Delivery contract for `POST /v1/events`: a 2xx tells the channel the whole
//! batch is done. Anything that may succeed on redelivery (store outage,
//! exhausted retries) answers 503 so the channel tries again; notifications
//! that can never decode are acknowledged and counted as dropped. A
//! subscription handshake is answered in the same response; transfer events
//! delivered alongside it are still reconciled.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fts_reconcile::{AggregateStore, ReconcileError};
use fts_schemas::{decode_notifications, EventNotification};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{
        ErrorResponse, EventResult, EventsResponse, HealthResponse, StatusResponse,
        ValidationResponse,
    },
    state::AppState,
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
        .route("/v1/status", get(status_handler))
        .route("/v1/events", post(events))
        .route("/v1/transfers/:principal/:transfer_id", get(transfer_get))
        .with_state(state)
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: msg.into() })).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(StatusResponse {
            daemon_uptime_secs: st.uptime_secs(),
            store_backend: st.store().name().to_string(),
            config_hash: st.config_hash.clone(),
            max_attempts: st.reconciler.policy().max_attempts(),
            counters: st.counters.snapshot(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/events
// ---------------------------------------------------------------------------

pub(crate) async fn events(State(st): State<Arc<AppState>>, body: Bytes) -> Response {
    let batch = match decode_notifications(&body) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "rejecting undecodable delivery body");
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("body is not an event or event array: {e}"),
            );
        }
    };

    let (handshakes, transfers): (Vec<_>, Vec<_>) = batch
        .iter()
        .partition(|n| n.is_subscription_validation());

    let validation_code = match handshakes.first() {
        Some(handshake) => {
            let Some(code) = answer_handshake(&st, handshake) else {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "subscription validation event without validationCode",
                );
            };
            Some(code)
        }
        None => None,
    };

    if transfers.is_empty() {
        if let Some(code) = validation_code {
            return (
                StatusCode::OK,
                Json(ValidationResponse {
                    validation_response: code,
                }),
            )
                .into_response();
        }
    }

    let mut results = Vec::with_capacity(transfers.len());
    let (mut accepted, mut dropped, mut failed) = (0usize, 0usize, 0usize);

    for n in transfers {
        // After a retryable failure the whole batch comes back; stop here.
        if failed > 0 {
            results.push(event_result(n, "skipped", None, None, None));
            continue;
        }

        st.counters.record_received();
        match st.reconciler.handle(n).await {
            Ok(out) => {
                st.counters.record_outcome(out.disposition);
                accepted += 1;
                results.push(event_result(
                    n,
                    out.disposition.as_str(),
                    Some(out.transfer_id),
                    Some(out.attempts),
                    None,
                ));
            }
            Err(ReconcileError::Decode(e)) => {
                st.counters.record_dropped();
                dropped += 1;
                results.push(event_result(n, "dropped", None, None, Some(e.to_string())));
            }
            Err(e) => {
                st.counters.record_failed();
                failed += 1;
                let attempts = match &e {
                    ReconcileError::ReconciliationFailed { attempts, .. } => Some(*attempts),
                    _ => None,
                };
                results.push(event_result(n, "failed", None, attempts, Some(e.to_string())));
            }
        }
    }

    info!(
        batch = batch.len(),
        handshake = validation_code.is_some(),
        accepted,
        dropped,
        failed,
        "delivery processed"
    );

    let status = if failed > 0 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(EventsResponse {
            accepted,
            dropped,
            failed,
            results,
            validation_response: validation_code,
        }),
    )
        .into_response()
}

/// Validation code to echo, or `None` when the handshake carries none.
fn answer_handshake(st: &AppState, n: &EventNotification) -> Option<String> {
    let code = n.validation_code()?;
    st.counters.record_validation();
    info!(topic = ?n.topic, "subscription validation handshake answered");
    Some(code.to_string())
}

fn event_result(
    n: &EventNotification,
    status: &str,
    transfer_id: Option<Uuid>,
    attempts: Option<u32>,
    error: Option<String>,
) -> EventResult {
    EventResult {
        id: n.id.clone(),
        event_type: n.event_type.clone(),
        status: status.to_string(),
        transfer_id,
        attempts,
        error,
    }
}

// ---------------------------------------------------------------------------
// GET /v1/transfers/:principal/:transfer_id
// ---------------------------------------------------------------------------

pub(crate) async fn transfer_get(
    State(st): State<Arc<AppState>>,
    Path((principal, transfer_id)): Path<(String, String)>,
) -> Response {
    let Ok(tid) = transfer_id.parse::<Uuid>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("transfer id is not a uuid: {transfer_id}"),
        );
    };

    match st.store().lookup(&principal, &tid.to_string()).await {
        Ok(Some(agg)) => (StatusCode::OK, Json(agg)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("no transfer {tid} for principal {principal}"),
        ),
        Err(e) => {
            warn!(error = %e, "transfer lookup failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}
