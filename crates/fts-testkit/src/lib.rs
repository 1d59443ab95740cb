//! Fixtures and store doubles shared by the scenario tests.

use chrono::{DateTime, TimeZone, Utc};
use fts_schemas::{
    ClassifiedEvent, EventNotification, TransferError, TransferInfo, TransferPayload,
    ERROR_EVENT_TYPE,
};
use serde_json::{json, Map};
use uuid::Uuid;

mod stores;

pub use stores::{ConflictingStore, FailingStore, GatedStore};

pub const ALICE: &str = "alice@contoso.com";
pub const BOB: &str = "bob@contoso.com";

pub const STARTED_EVENT_TYPE: &str = "TransferStarted";

// 2024-03-01T10:00:00Z
const BASE_TS: i64 = 1_709_287_200;

/// Fixed instant `offset_secs` after the fixture epoch.
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE_TS + offset_secs, 0)
        .single()
        .unwrap_or_default()
}

/// Deterministic transfer id; `transfer_id(7)` is the same in every test.
pub fn transfer_id(n: u128) -> Uuid {
    Uuid::from_u128(0x6f1c_2d52_4b0e_4a4c_9d7b_0000_0000_0000 | n)
}

/// A wire notification for a non-error transfer event.
pub fn started(transfer_id: Uuid, principal: &str) -> EventNotification {
    notification(
        STARTED_EVENT_TYPE,
        json!({
            "TransferId": transfer_id,
            "OriginatingUserPrincipalName": principal,
            "OriginationDateTime": at(-2),
        }),
        0,
    )
}

/// A wire notification for an `"Error"` event.
pub fn failed(transfer_id: Uuid, principal: &str, message: &str) -> EventNotification {
    notification(
        ERROR_EVENT_TYPE,
        json!({
            "TransferId": transfer_id,
            "OriginatingUserPrincipalName": principal,
            "OriginationDateTime": at(60),
            "ErrorMessage": message,
        }),
        120,
    )
}

pub fn notification(
    event_type: &str,
    data: serde_json::Value,
    offset_secs: i64,
) -> EventNotification {
    EventNotification {
        id: Uuid::new_v4().to_string(),
        topic: Some("/subscriptions/test/topics/transfers".to_string()),
        subject: "/transfers/upload".to_string(),
        event_type: event_type.to_string(),
        event_time: at(offset_secs),
        data,
        data_version: Some("1.0".to_string()),
    }
}

/// Already-classified info event. `label` becomes the event type and subject
/// suffix so concurrent events stay distinguishable in assertions.
pub fn started_event(transfer_id: Uuid, principal: &str, label: &str) -> ClassifiedEvent {
    ClassifiedEvent {
        subject: format!("/transfers/{label}"),
        event_type: label.to_string(),
        event_time: at(0),
        payload: TransferPayload::Started(TransferInfo {
            transfer_id,
            originating_user_principal_name: principal.to_string(),
            origination_date_time: at(-2),
            details: Map::new(),
        }),
    }
}

/// Already-classified error event with its own origination time.
pub fn error_event(
    transfer_id: Uuid,
    principal: &str,
    origination: DateTime<Utc>,
) -> ClassifiedEvent {
    ClassifiedEvent {
        subject: "/transfers/scan".to_string(),
        event_type: ERROR_EVENT_TYPE.to_string(),
        event_time: at(120),
        payload: TransferPayload::Error(TransferError {
            transfer_id,
            originating_user_principal_name: principal.to_string(),
            origination_date_time: origination,
            error_message: "scan failed".to_string(),
            details: Map::new(),
        }),
    }
}
