//! [`AggregateStore`] doubles for forcing races and failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use fts_reconcile::{AggregateStore, StoreError};
use fts_schemas::{TransferAggregate, VersionToken};
use tokio::sync::Barrier;
use uuid::Uuid;

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ---------------------------------------------------------------------------
// GatedStore
// ---------------------------------------------------------------------------

/// Holds the first `parties` by-id lookups at a barrier after they have read.
///
/// Every gated caller therefore observes the same snapshot before any of
/// them writes. Lookups after the first `parties` pass straight through, as
/// do partition-scoped point reads.
pub struct GatedStore<S> {
    inner: S,
    gate: Barrier,
    gated: AtomicUsize,
}

impl<S: AggregateStore> GatedStore<S> {
    pub fn new(inner: S, parties: usize) -> Self {
        Self {
            inner,
            gate: Barrier::new(parties),
            gated: AtomicUsize::new(parties),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: AggregateStore> AggregateStore for GatedStore<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn lookup(
        &self,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<TransferAggregate>, StoreError> {
        self.inner.lookup(partition_key, id).await
    }

    async fn lookup_by_id(&self, id: &str) -> Result<Option<TransferAggregate>, StoreError> {
        let res = self.inner.lookup_by_id(id).await;
        if take_one(&self.gated) {
            self.gate.wait().await;
        }
        res
    }

    async fn create(&self, aggregate: &TransferAggregate) -> Result<VersionToken, StoreError> {
        self.inner.create(aggregate).await
    }

    async fn replace(
        &self,
        aggregate: &TransferAggregate,
        expected: &VersionToken,
    ) -> Result<VersionToken, StoreError> {
        self.inner.replace(aggregate, expected).await
    }
}

// ---------------------------------------------------------------------------
// ConflictingStore
// ---------------------------------------------------------------------------

/// Rejects the first `n` writes with a conflict without applying them.
///
/// Remembers the newest event id of every rejected document so tests can
/// see what a retry tried to write.
pub struct ConflictingStore<S> {
    inner: S,
    remaining: AtomicUsize,
    injected: AtomicUsize,
    rejected: Mutex<Vec<Uuid>>,
}

impl<S: AggregateStore> ConflictingStore<S> {
    pub fn first(inner: S, n: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(n),
            injected: AtomicUsize::new(0),
            rejected: Mutex::new(Vec::new()),
        }
    }

    /// Every write conflicts.
    pub fn always(inner: S) -> Self {
        Self::first(inner, usize::MAX)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Conflicts handed out so far.
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    /// Newest event id of each rejected write, in rejection order.
    pub fn rejected_event_ids(&self) -> Vec<Uuid> {
        self.rejected
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn inject(&self, aggregate: &TransferAggregate) -> bool {
        if !take_one(&self.remaining) {
            return false;
        }
        self.injected.fetch_add(1, Ordering::SeqCst);
        if let (Ok(mut ids), Some(last)) = (self.rejected.lock(), aggregate.events.last()) {
            ids.push(last.id);
        }
        true
    }
}

#[async_trait]
impl<S: AggregateStore> AggregateStore for ConflictingStore<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn lookup(
        &self,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<TransferAggregate>, StoreError> {
        self.inner.lookup(partition_key, id).await
    }

    async fn lookup_by_id(&self, id: &str) -> Result<Option<TransferAggregate>, StoreError> {
        self.inner.lookup_by_id(id).await
    }

    async fn create(&self, aggregate: &TransferAggregate) -> Result<VersionToken, StoreError> {
        if self.inject(aggregate) {
            let (p, id) = aggregate.key();
            return Err(StoreError::already_exists(p, id));
        }
        self.inner.create(aggregate).await
    }

    async fn replace(
        &self,
        aggregate: &TransferAggregate,
        expected: &VersionToken,
    ) -> Result<VersionToken, StoreError> {
        if self.inject(aggregate) {
            let (p, id) = aggregate.key();
            return Err(StoreError::version_mismatch(p, id));
        }
        self.inner.replace(aggregate, expected).await
    }
}

// ---------------------------------------------------------------------------
// FailingStore
// ---------------------------------------------------------------------------

/// Every call fails with a backend error.
#[derive(Default)]
pub struct FailingStore {
    calls: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self) -> StoreError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StoreError::backend("injected outage")
    }
}

#[async_trait]
impl AggregateStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn lookup(
        &self,
        _partition_key: &str,
        _id: &str,
    ) -> Result<Option<TransferAggregate>, StoreError> {
        Err(self.fail())
    }

    async fn lookup_by_id(&self, _id: &str) -> Result<Option<TransferAggregate>, StoreError> {
        Err(self.fail())
    }

    async fn create(&self, _aggregate: &TransferAggregate) -> Result<VersionToken, StoreError> {
        Err(self.fail())
    }

    async fn replace(
        &self,
        _aggregate: &TransferAggregate,
        _expected: &VersionToken,
    ) -> Result<VersionToken, StoreError> {
        Err(self.fail())
    }
}
