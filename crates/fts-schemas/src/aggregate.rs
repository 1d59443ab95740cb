use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TransferPayload;

/// Opaque concurrency token assigned by the store on every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of a transfer's event log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub id: Uuid,
    pub subject: String,
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub payload: TransferPayload,
}

/// Per-transfer document: identity fields plus the append-only event log.
///
/// Invariants upheld by the methods here:
/// - `events` is never empty (construction goes through [`TransferAggregate::seed`]).
/// - identity fields are taken from the seeding event and never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAggregate {
    /// Store document id (string form of `transfer_id`).
    pub id: String,
    pub transfer_id: Uuid,
    /// Partition key.
    pub originating_principal: String,
    pub origination_time: DateTime<Utc>,
    pub events: Vec<TransferEvent>,
    /// `None` until the store has accepted the document once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_token: Option<VersionToken>,
}

impl TransferAggregate {
    /// New, not-yet-persisted aggregate seeded with its first event.
    pub fn seed(first: TransferEvent) -> Self {
        let transfer_id = first.payload.transfer_id();
        Self {
            id: transfer_id.to_string(),
            transfer_id,
            originating_principal: first.payload.originating_principal().to_string(),
            origination_time: first.payload.origination_time(),
            events: vec![first],
            version_token: None,
        }
    }

    /// Append in memory. Identity fields are left untouched even when the
    /// event reports different values (first writer wins).
    pub fn append(&mut self, event: TransferEvent) {
        self.events.push(event);
    }

    pub fn contains_event(&self, event_id: Uuid) -> bool {
        self.events.iter().any(|e| e.id == event_id)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Partition key + document id, the store's address for this aggregate.
    pub fn key(&self) -> (&str, &str) {
        (&self.originating_principal, &self.id)
    }
}
