//! The reconciliation loop.
//!
//! Per event:
//!
//! ```text
//! Start → Classify → Lookup ─┬─ found ─────► Append  ─┬─► Committed
//!                            └─ not found ─► Create  ─┤
//!                                                     └─ conflict ─► Lookup (bounded)
//! ```
//!
//! Terminal states are `Committed` (an `Ok` outcome) and `Failed`
//! (`ReconcileError`). Nothing is held between invocations; the store is the
//! single source of truth.

use std::fmt;

use fts_schemas::{ClassifiedEvent, EventNotification, TransferAggregate, TransferEvent, VersionToken};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classify::{classify, DecodeError};
use crate::policy::{EventIdentity, RetryPolicy};
use crate::store::{AggregateStore, ConflictKind, StoreError};

/// What the committed attempt did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// First sighting: the aggregate was created with this event.
    Created,
    /// The event was appended to an existing aggregate.
    Appended,
    /// The event id was already in the log; nothing was written.
    Duplicate,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Created => "created",
            Disposition::Appended => "appended",
            Disposition::Duplicate => "duplicate",
        }
    }
}

/// Result of a committed reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub transfer_id: Uuid,
    /// Partition of the stored aggregate: the principal of the transfer's
    /// first event, not necessarily of this one.
    pub partition_key: String,
    pub event_id: Uuid,
    pub disposition: Disposition,
    /// Attempts used, including the committing one.
    pub attempts: u32,
    /// Store version after the commit (the existing version for duplicates).
    pub version: VersionToken,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileError {
    /// Payload rejected by the classifier. No store call was made.
    Decode(DecodeError),
    /// Non-conflict store failure. Surfaces on first occurrence.
    Store(StoreError),
    /// Every attempt up to the ceiling lost a race.
    ReconciliationFailed {
        transfer_id: Uuid,
        /// Principal named by the event that gave up.
        partition_key: String,
        attempts: u32,
        last_conflict: ConflictKind,
    },
}

impl ReconcileError {
    /// Whether redelivering the same notification can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::Decode(_))
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::Decode(e) => write!(f, "{e}"),
            ReconcileError::Store(e) => write!(f, "{e}"),
            ReconcileError::ReconciliationFailed {
                transfer_id,
                partition_key,
                attempts,
                last_conflict,
            } => write!(
                f,
                "reconciliation failed: transfer_id={transfer_id} partition={partition_key} \
                 gave up after {attempts} attempt(s), last conflict={}",
                last_conflict.as_str()
            ),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Decode(e) => Some(e),
            ReconcileError::Store(e) => Some(e),
            ReconcileError::ReconciliationFailed { .. } => None,
        }
    }
}

impl From<DecodeError> for ReconcileError {
    fn from(e: DecodeError) -> Self {
        ReconcileError::Decode(e)
    }
}

/// One committed attempt.
struct Committed {
    disposition: Disposition,
    version: VersionToken,
    partition_key: String,
}

/// Folds transfer notifications into per-transfer aggregates.
///
/// Cheap to share: wrap in `Arc` and call from any number of tasks. All
/// coordination between concurrent calls goes through the store's
/// conditional writes.
#[derive(Debug)]
pub struct EventReconciler<S> {
    store: S,
    policy: RetryPolicy,
    identity: EventIdentity,
}

impl<S: AggregateStore> EventReconciler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
            identity: EventIdentity::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_identity(mut self, identity: EventIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn identity(&self) -> EventIdentity {
        self.identity
    }

    /// Classify and reconcile one delivered notification.
    pub async fn handle(
        &self,
        notification: &EventNotification,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let event = match classify(notification) {
            Ok(ev) => ev,
            Err(e) => {
                error!(
                    notification_id = %notification.id,
                    event_type = %notification.event_type,
                    error = %e,
                    "dropping undecodable notification"
                );
                return Err(e.into());
            }
        };
        self.reconcile(&event).await
    }

    /// Reconcile an already-classified event.
    ///
    /// The event id is fixed once, before the first attempt, so a retried
    /// append records the same entry it would have recorded the first time.
    pub async fn reconcile(
        &self,
        event: &ClassifiedEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let record = TransferEvent {
            id: self.identity.event_id(event),
            subject: event.subject.clone(),
            event_type: event.event_type.clone(),
            event_time: event.event_time,
            payload: event.payload.clone(),
        };
        let transfer_id = event.transfer_id();
        let principal = event.originating_principal();
        let doc_id = event.document_id();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.attempt(&record, &doc_id).await {
                Ok(done) => {
                    info!(
                        store = self.store.name(),
                        %transfer_id,
                        partition = %done.partition_key,
                        event_id = %record.id,
                        event_type = %record.event_type,
                        disposition = done.disposition.as_str(),
                        attempt,
                        "transfer event reconciled"
                    );
                    return Ok(ReconcileOutcome {
                        transfer_id,
                        partition_key: done.partition_key,
                        event_id: record.id,
                        disposition: done.disposition,
                        attempts: attempt,
                        version: done.version,
                    });
                }
                Err(StoreError::Conflict { kind, .. }) => {
                    if attempt >= self.policy.max_attempts() {
                        error!(
                            store = self.store.name(),
                            %transfer_id,
                            principal,
                            event_id = %record.id,
                            attempts = attempt,
                            conflict = kind.as_str(),
                            "retry ceiling reached; leaving event for redelivery"
                        );
                        return Err(ReconcileError::ReconciliationFailed {
                            transfer_id,
                            partition_key: principal.to_string(),
                            attempts: attempt,
                            last_conflict: kind,
                        });
                    }

                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        store = self.store.name(),
                        %transfer_id,
                        principal,
                        attempt,
                        conflict = kind.as_str(),
                        backoff_ms = delay.as_millis() as u64,
                        "write conflict; restarting from lookup"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    error!(
                        store = self.store.name(),
                        %transfer_id,
                        principal,
                        attempt,
                        error = %e,
                        "store failure"
                    );
                    return Err(ReconcileError::Store(e));
                }
            }
        }
    }

    /// One pass of {lookup, mutate in memory, conditional write}.
    ///
    /// The read is by transfer id across partitions; the write goes back to
    /// the partition the stored aggregate already lives in.
    async fn attempt(&self, record: &TransferEvent, doc_id: &str) -> Result<Committed, StoreError> {
        match self.store.lookup_by_id(doc_id).await? {
            Some(mut aggregate) => {
                let partition_key = aggregate.originating_principal.clone();
                let expected = aggregate.version_token.clone().ok_or_else(|| {
                    StoreError::backend(format!(
                        "stored aggregate partition={partition_key} id={doc_id} has no version token"
                    ))
                })?;

                if aggregate.contains_event(record.id) {
                    debug!(event_id = %record.id, "event already recorded");
                    return Ok(Committed {
                        disposition: Disposition::Duplicate,
                        version: expected,
                        partition_key,
                    });
                }

                aggregate.append(record.clone());
                let version = self.store.replace(&aggregate, &expected).await?;
                Ok(Committed {
                    disposition: Disposition::Appended,
                    version,
                    partition_key,
                })
            }
            None => {
                let aggregate = TransferAggregate::seed(record.clone());
                let version = self.store.create(&aggregate).await?;
                Ok(Committed {
                    disposition: Disposition::Created,
                    version,
                    partition_key: aggregate.originating_principal,
                })
            }
        }
    }
}
