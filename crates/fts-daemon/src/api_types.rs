//! Request and response types for all fts-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::CounterSnapshot;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    /// "postgres" | "memory"
    pub store_backend: String,
    pub config_hash: String,
    pub max_attempts: u32,
    pub counters: CounterSnapshot,
}

// ---------------------------------------------------------------------------
// /v1/events
// ---------------------------------------------------------------------------

/// Subscription handshake answer. Field name is fixed by the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub validation_response: String,
}

/// What happened to one notification of a delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResult {
    pub id: String,
    pub event_type: String,
    /// "created" | "appended" | "duplicate" | "dropped" | "failed" | "skipped"
    pub status: String,
    pub transfer_id: Option<Uuid>,
    pub attempts: Option<u32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsResponse {
    /// Committed or recognised as duplicates.
    pub accepted: usize,
    pub dropped: usize,
    pub failed: usize,
    pub results: Vec<EventResult>,
    /// Set when a handshake arrived in the same delivery as transfer events.
    #[serde(
        rename = "validationResponse",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub validation_response: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
