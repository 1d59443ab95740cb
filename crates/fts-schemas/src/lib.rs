//! fts-schemas
//!
//! Wire and document shapes shared by every crate in the workspace:
//! - the inbound Event Grid notification envelope,
//! - the two transfer payload shapes (info / error),
//! - the stored per-transfer aggregate document.
//!
//! No IO and no business logic beyond the aggregate's own append rules.

mod aggregate;

pub use aggregate::{TransferAggregate, TransferEvent, VersionToken};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Type tag the upstream publisher uses for failure reports.
pub const ERROR_EVENT_TYPE: &str = "Error";

/// Event Grid handshake sent once when a webhook subscription is registered.
pub const SUBSCRIPTION_VALIDATION_EVENT_TYPE: &str =
    "Microsoft.EventGrid.SubscriptionValidationEvent";

// ---------------------------------------------------------------------------
// Inbound envelope
// ---------------------------------------------------------------------------

/// One notification as delivered by the channel (Event Grid schema).
///
/// `data` is kept as raw JSON; classification into a [`TransferPayload`]
/// happens in `fts-reconcile` so a malformed payload never reaches the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNotification {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub subject: String,
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_version: Option<String>,
}

impl EventNotification {
    pub fn is_subscription_validation(&self) -> bool {
        self.event_type == SUBSCRIPTION_VALIDATION_EVENT_TYPE
    }

    /// `validationCode` carried by a subscription-validation handshake.
    pub fn validation_code(&self) -> Option<&str> {
        if !self.is_subscription_validation() {
            return None;
        }
        self.data.get("validationCode").and_then(Value::as_str)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<EventNotification>),
    One(Box<EventNotification>),
}

/// Decode a delivery body. Event Grid posts arrays; single objects are
/// accepted for manual replays.
pub fn decode_notifications(body: &[u8]) -> Result<Vec<EventNotification>, serde_json::Error> {
    match serde_json::from_slice::<OneOrMany>(body)? {
        OneOrMany::Many(v) => Ok(v),
        OneOrMany::One(n) => Ok(vec![*n]),
    }
}

// ---------------------------------------------------------------------------
// Payload shapes
// ---------------------------------------------------------------------------

/// Normal lifecycle detail ("transfer started" and friends).
///
/// Field names follow the publisher (PascalCase); camelCase is accepted too.
/// Anything beyond the identity fields is preserved verbatim in `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferInfo {
    #[serde(rename = "TransferId", alias = "transferId")]
    pub transfer_id: Uuid,
    #[serde(
        rename = "OriginatingUserPrincipalName",
        alias = "originatingUserPrincipalName"
    )]
    pub originating_user_principal_name: String,
    #[serde(rename = "OriginationDateTime", alias = "originationDateTime")]
    pub origination_date_time: DateTime<Utc>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Failure report. Same identity fields as [`TransferInfo`] plus a
/// mandatory error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferError {
    #[serde(rename = "TransferId", alias = "transferId")]
    pub transfer_id: Uuid,
    #[serde(
        rename = "OriginatingUserPrincipalName",
        alias = "originatingUserPrincipalName"
    )]
    pub originating_user_principal_name: String,
    #[serde(rename = "OriginationDateTime", alias = "originationDateTime")]
    pub origination_date_time: DateTime<Utc>,
    #[serde(rename = "ErrorMessage", alias = "errorMessage")]
    pub error_message: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Polymorphic event detail. Both variants expose the same identity
/// capability set through the accessor methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransferPayload {
    Started(TransferInfo),
    Error(TransferError),
}

impl TransferPayload {
    pub fn transfer_id(&self) -> Uuid {
        match self {
            TransferPayload::Started(i) => i.transfer_id,
            TransferPayload::Error(e) => e.transfer_id,
        }
    }

    pub fn originating_principal(&self) -> &str {
        match self {
            TransferPayload::Started(i) => &i.originating_user_principal_name,
            TransferPayload::Error(e) => &e.originating_user_principal_name,
        }
    }

    pub fn origination_time(&self) -> DateTime<Utc> {
        match self {
            TransferPayload::Started(i) => i.origination_date_time,
            TransferPayload::Error(e) => e.origination_date_time,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TransferPayload::Error(_))
    }
}

/// A notification that passed classification: envelope metadata plus a
/// typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    pub subject: String,
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub payload: TransferPayload,
}

impl ClassifiedEvent {
    pub fn transfer_id(&self) -> Uuid {
        self.payload.transfer_id()
    }

    pub fn originating_principal(&self) -> &str {
        self.payload.originating_principal()
    }

    pub fn origination_time(&self) -> DateTime<Utc> {
        self.payload.origination_time()
    }

    /// Store document id for this event's transfer.
    pub fn document_id(&self) -> String {
        self.transfer_id().to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notification_json(event_type: &str) -> Value {
        json!({
            "id": "evt-1",
            "subject": "/transfers/upload",
            "eventType": event_type,
            "eventTime": "2024-03-01T10:00:00Z",
            "data": {
                "TransferId": "6f1c2d52-4b0e-4a4c-9d7b-0f3c1c2a9e11",
                "OriginatingUserPrincipalName": "alice@contoso.com",
                "OriginationDateTime": "2024-03-01T09:59:58Z"
            },
            "dataVersion": "1.0"
        })
    }

    #[test]
    fn decode_accepts_single_object() {
        let body = serde_json::to_vec(&notification_json("TransferStarted")).unwrap();
        let v = decode_notifications(&body).unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].event_type, "TransferStarted");
        assert_eq!(v[0].data_version.as_deref(), Some("1.0"));
    }

    #[test]
    fn decode_accepts_array() {
        let body = serde_json::to_vec(&json!([
            notification_json("TransferStarted"),
            notification_json("Error"),
        ]))
        .unwrap();
        let v = decode_notifications(&body).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v[1].event_type, ERROR_EVENT_TYPE);
    }

    #[test]
    fn decode_rejects_non_envelope() {
        assert!(decode_notifications(br#"{"hello":"world"}"#).is_err());
        assert!(decode_notifications(b"not json").is_err());
    }

    #[test]
    fn validation_code_only_for_handshake() {
        let n: EventNotification = serde_json::from_value(json!({
            "id": "v",
            "subject": "",
            "eventType": SUBSCRIPTION_VALIDATION_EVENT_TYPE,
            "eventTime": "2024-03-01T10:00:00Z",
            "data": { "validationCode": "512d38b6-c7b8-40c8-89fe-f46f9e9622b6" }
        }))
        .unwrap();
        assert_eq!(
            n.validation_code(),
            Some("512d38b6-c7b8-40c8-89fe-f46f9e9622b6")
        );

        let other: EventNotification =
            serde_json::from_value(notification_json("TransferStarted")).unwrap();
        assert_eq!(other.validation_code(), None);
    }

    #[test]
    fn info_keeps_extra_fields_in_details() {
        let info: TransferInfo = serde_json::from_value(json!({
            "TransferId": "6f1c2d52-4b0e-4a4c-9d7b-0f3c1c2a9e11",
            "OriginatingUserPrincipalName": "alice@contoso.com",
            "OriginationDateTime": "2024-03-01T09:59:58Z",
            "FileName": "report.csv"
        }))
        .unwrap();
        assert_eq!(info.details.get("FileName"), Some(&json!("report.csv")));
        assert!(!info.details.contains_key("TransferId"));
    }

    #[test]
    fn camel_case_payload_is_accepted() {
        let info: TransferInfo = serde_json::from_value(json!({
            "transferId": "6f1c2d52-4b0e-4a4c-9d7b-0f3c1c2a9e11",
            "originatingUserPrincipalName": "bob@contoso.com",
            "originationDateTime": "2024-03-01T09:59:58Z"
        }))
        .unwrap();
        assert_eq!(info.originating_user_principal_name, "bob@contoso.com");
    }

    #[test]
    fn stored_payload_keeps_its_variant() {
        let err = TransferPayload::Error(TransferError {
            transfer_id: Uuid::nil(),
            originating_user_principal_name: "alice@contoso.com".to_string(),
            origination_date_time: "2024-03-01T09:59:58Z".parse().unwrap(),
            error_message: "virus scan failed".to_string(),
            details: Map::new(),
        });
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["kind"], "error");
        let back: TransferPayload = serde_json::from_value(v).unwrap();
        assert!(back.is_error());
        assert_eq!(back.originating_principal(), "alice@contoso.com");
    }
}
