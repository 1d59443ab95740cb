use fts_schemas::{
    ClassifiedEvent, EventNotification, TransferError, TransferInfo, TransferPayload,
    ERROR_EVENT_TYPE,
};

/// Why a notification could not be turned into a [`ClassifiedEvent`].
///
/// Never retryable: the same bytes will fail the same way on redelivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// `data` does not match the shape selected by the type tag.
    Payload {
        event_type: String,
        shape: &'static str,
        reason: String,
    },
    /// Principal is empty; it is the partition key, so nothing can be stored.
    MissingPrincipal { event_type: String },
    /// Transfer id is the nil UUID.
    NilTransferId { event_type: String },
    /// Channel control traffic (e.g. subscription validation), not a transfer event.
    Unsupported { event_type: String },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Payload {
                event_type,
                shape,
                reason,
            } => write!(
                f,
                "decode error: eventType={event_type} payload is not a valid {shape} shape: {reason}"
            ),
            DecodeError::MissingPrincipal { event_type } => write!(
                f,
                "decode error: eventType={event_type} has an empty originating principal"
            ),
            DecodeError::NilTransferId { event_type } => {
                write!(f, "decode error: eventType={event_type} has a nil transfer id")
            }
            DecodeError::Unsupported { event_type } => {
                write!(f, "decode error: eventType={event_type} is not a transfer event")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Classify a notification by its type tag.
///
/// - `"Error"` → [`TransferPayload::Error`]
/// - anything else → [`TransferPayload::Started`]
pub fn classify(n: &EventNotification) -> Result<ClassifiedEvent, DecodeError> {
    if n.is_subscription_validation() {
        return Err(DecodeError::Unsupported {
            event_type: n.event_type.clone(),
        });
    }

    let payload = if n.event_type == ERROR_EVENT_TYPE {
        serde_json::from_value::<TransferError>(n.data.clone())
            .map(TransferPayload::Error)
            .map_err(|e| DecodeError::Payload {
                event_type: n.event_type.clone(),
                shape: "error",
                reason: e.to_string(),
            })?
    } else {
        serde_json::from_value::<TransferInfo>(n.data.clone())
            .map(TransferPayload::Started)
            .map_err(|e| DecodeError::Payload {
                event_type: n.event_type.clone(),
                shape: "info",
                reason: e.to_string(),
            })?
    };

    if payload.originating_principal().trim().is_empty() {
        return Err(DecodeError::MissingPrincipal {
            event_type: n.event_type.clone(),
        });
    }
    if payload.transfer_id().is_nil() {
        return Err(DecodeError::NilTransferId {
            event_type: n.event_type.clone(),
        });
    }

    Ok(ClassifiedEvent {
        subject: n.subject.clone(),
        event_type: n.event_type.clone(),
        event_time: n.event_time,
        payload,
    })
}
