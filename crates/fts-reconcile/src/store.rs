//! Aggregate store boundary.
//!
//! The reconciler only needs three primitives: lookup by transfer id,
//! conditional create, conditional replace. A transfer id names exactly one
//! document; the partition key is whatever principal created it. Conflicts
//! are reported as data
//! ([`StoreError::Conflict`]) so the reconciler can tell a lost race from a
//! broken backend.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use fts_schemas::{TransferAggregate, VersionToken};

/// Which precondition a conditional write failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictKind {
    /// `create` found a document with the same id (in any partition).
    AlreadyExists,
    /// `replace` found a different version token (or no document at all).
    VersionMismatch,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::AlreadyExists => "already_exists",
            ConflictKind::VersionMismatch => "version_mismatch",
        }
    }
}

/// Errors a [`AggregateStore`] implementation may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A conditional write lost a race. Retryable after a fresh lookup.
    Conflict {
        kind: ConflictKind,
        partition_key: String,
        id: String,
    },
    /// Connectivity, auth, quota, serialization: anything that is not a race.
    Backend(String),
}

impl StoreError {
    pub fn already_exists(partition_key: &str, id: &str) -> Self {
        StoreError::Conflict {
            kind: ConflictKind::AlreadyExists,
            partition_key: partition_key.to_string(),
            id: id.to_string(),
        }
    }

    pub fn version_mismatch(partition_key: &str, id: &str) -> Self {
        StoreError::Conflict {
            kind: ConflictKind::VersionMismatch,
            partition_key: partition_key.to_string(),
            id: id.to_string(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        StoreError::Backend(msg.into())
    }

    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            StoreError::Conflict { kind, .. } => Some(*kind),
            StoreError::Backend(_) => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.conflict_kind().is_some()
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Conflict {
                kind,
                partition_key,
                id,
            } => write!(
                f,
                "store conflict ({}): partition={partition_key} id={id}",
                kind.as_str()
            ),
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Keyed, partitioned document store with conditional writes.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// concurrent reconciliation.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Human-readable backend name for logs (e.g. `"postgres"`).
    fn name(&self) -> &'static str;

    /// Point read within one partition. The returned aggregate carries the
    /// current version token.
    async fn lookup(
        &self,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<TransferAggregate>, StoreError>;

    /// Read the document with this id whatever partition it lives in. This is
    /// the reconciler's read: later events may name a different principal
    /// than the one that created the aggregate.
    async fn lookup_by_id(&self, id: &str) -> Result<Option<TransferAggregate>, StoreError>;

    /// Insert `aggregate`. Fails with [`ConflictKind::AlreadyExists`] iff a
    /// document with the same id exists in any partition.
    async fn create(&self, aggregate: &TransferAggregate) -> Result<VersionToken, StoreError>;

    /// Overwrite `aggregate` iff the stored token equals `expected`; fails
    /// with [`ConflictKind::VersionMismatch`] otherwise.
    async fn replace(
        &self,
        aggregate: &TransferAggregate,
        expected: &VersionToken,
    ) -> Result<VersionToken, StoreError>;
}

#[async_trait]
impl<S: AggregateStore + ?Sized> AggregateStore for Arc<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn lookup(
        &self,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<TransferAggregate>, StoreError> {
        (**self).lookup(partition_key, id).await
    }

    async fn lookup_by_id(&self, id: &str) -> Result<Option<TransferAggregate>, StoreError> {
        (**self).lookup_by_id(id).await
    }

    async fn create(&self, aggregate: &TransferAggregate) -> Result<VersionToken, StoreError> {
        (**self).create(aggregate).await
    }

    async fn replace(
        &self,
        aggregate: &TransferAggregate,
        expected: &VersionToken,
    ) -> Result<VersionToken, StoreError> {
        (**self).replace(aggregate, expected).await
    }
}
