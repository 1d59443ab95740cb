//! In-memory aggregate store.
//!
//! Single-process, no durability. Backs unit/scenario tests and the daemon
//! when no database is configured. Conditional-write semantics match the
//! Postgres store exactly, so races reproduce the same way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use fts_schemas::{TransferAggregate, VersionToken};

use crate::store::{AggregateStore, StoreError};

/// Number of calls each primitive has received.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub lookups: usize,
    pub creates: usize,
    pub replaces: usize,
}

impl StoreCalls {
    pub fn total(&self) -> usize {
        self.lookups + self.creates + self.replaces
    }

    pub fn writes(&self) -> usize {
        self.creates + self.replaces
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    lookups: AtomicUsize,
    creates: AtomicUsize,
    replaces: AtomicUsize,
}

/// Documents are keyed by id alone; the partition key is checked on read
/// and write but never makes a second document for the same id.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, TransferAggregate>>,
    next_version: AtomicU64,
    calls: CallCounters,
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::backend("in-memory store lock poisoned")
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_version(&self) -> VersionToken {
        let v = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        VersionToken::new(v.to_string())
    }

    /// Direct read for assertions; not counted in [`InMemoryStore::calls`].
    pub fn get(&self, partition_key: &str, id: &str) -> Option<TransferAggregate> {
        let docs = self.docs.read().ok()?;
        docs.get(id)
            .filter(|d| d.originating_principal == partition_key)
            .cloned()
    }

    /// Direct read by id, any partition; not counted either.
    pub fn get_by_id(&self, id: &str) -> Option<TransferAggregate> {
        self.docs.read().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            lookups: self.calls.lookups.load(Ordering::SeqCst),
            creates: self.calls.creates.load(Ordering::SeqCst),
            replaces: self.calls.replaces.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl AggregateStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn lookup(
        &self,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<TransferAggregate>, StoreError> {
        self.calls.lookups.fetch_add(1, Ordering::SeqCst);
        let docs = self.docs.read().map_err(poison_err)?;
        Ok(docs
            .get(id)
            .filter(|d| d.originating_principal == partition_key)
            .cloned())
    }

    async fn lookup_by_id(&self, id: &str) -> Result<Option<TransferAggregate>, StoreError> {
        self.calls.lookups.fetch_add(1, Ordering::SeqCst);
        let docs = self.docs.read().map_err(poison_err)?;
        Ok(docs.get(id).cloned())
    }

    async fn create(&self, aggregate: &TransferAggregate) -> Result<VersionToken, StoreError> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        let (partition_key, id) = aggregate.key();

        let mut docs = self.docs.write().map_err(poison_err)?;
        if docs.contains_key(id) {
            return Err(StoreError::already_exists(partition_key, id));
        }

        let version = self.mint_version();
        let mut stored = aggregate.clone();
        stored.version_token = Some(version.clone());
        docs.insert(id.to_string(), stored);
        Ok(version)
    }

    async fn replace(
        &self,
        aggregate: &TransferAggregate,
        expected: &VersionToken,
    ) -> Result<VersionToken, StoreError> {
        self.calls.replaces.fetch_add(1, Ordering::SeqCst);
        let (partition_key, id) = aggregate.key();

        let mut docs = self.docs.write().map_err(poison_err)?;
        // A vanished document is a stale snapshot too: report it the same way.
        let current = docs
            .get(id)
            .filter(|d| d.originating_principal == partition_key)
            .and_then(|d| d.version_token.as_ref());
        if current != Some(expected) {
            return Err(StoreError::version_mismatch(partition_key, id));
        }

        let version = self.mint_version();
        let mut stored = aggregate.clone();
        stored.version_token = Some(version.clone());
        docs.insert(id.to_string(), stored);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConflictKind;
    use fts_schemas::{TransferEvent, TransferInfo, TransferPayload};
    use serde_json::Map;
    use uuid::Uuid;

    fn aggregate(principal: &str) -> TransferAggregate {
        TransferAggregate::seed(TransferEvent {
            id: Uuid::new_v4(),
            subject: "/transfers/upload".to_string(),
            event_type: "TransferStarted".to_string(),
            event_time: "2024-03-01T10:00:00Z".parse().unwrap(),
            payload: TransferPayload::Started(TransferInfo {
                transfer_id: "6f1c2d52-4b0e-4a4c-9d7b-0f3c1c2a9e11".parse().unwrap(),
                originating_user_principal_name: principal.to_string(),
                origination_date_time: "2024-03-01T09:59:58Z".parse().unwrap(),
                details: Map::new(),
            }),
        })
    }

    #[tokio::test]
    async fn create_then_duplicate_create_conflicts() {
        let store = InMemoryStore::new();
        let agg = aggregate("alice@contoso.com");

        let v1 = store.create(&agg).await.unwrap();
        let err = store.create(&agg).await.unwrap_err();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::AlreadyExists));

        let (p, id) = agg.key();
        let stored = store.lookup(p, id).await.unwrap().unwrap();
        assert_eq!(stored.version_token, Some(v1));
    }

    #[tokio::test]
    async fn same_id_under_another_principal_is_already_taken() {
        let store = InMemoryStore::new();
        store.create(&aggregate("alice@contoso.com")).await.unwrap();

        let err = store
            .create(&aggregate("bob@contoso.com"))
            .await
            .unwrap_err();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::AlreadyExists));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn lookup_by_id_ignores_partition_but_point_lookup_does_not() {
        let store = InMemoryStore::new();
        let agg = aggregate("alice@contoso.com");
        store.create(&agg).await.unwrap();

        let found = store.lookup_by_id(&agg.id).await.unwrap().unwrap();
        assert_eq!(found.originating_principal, "alice@contoso.com");
        assert!(store
            .lookup("bob@contoso.com", &agg.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn replace_under_wrong_partition_is_a_version_mismatch() {
        let store = InMemoryStore::new();
        let agg = aggregate("alice@contoso.com");
        let v1 = store.create(&agg).await.unwrap();

        let mut moved = agg.clone();
        moved.originating_principal = "bob@contoso.com".to_string();
        let err = store.replace(&moved, &v1).await.unwrap_err();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::VersionMismatch));
        assert_eq!(
            store.get_by_id(&agg.id).unwrap().originating_principal,
            "alice@contoso.com"
        );
    }

    #[tokio::test]
    async fn replace_advances_version_and_rejects_stale_token() {
        let store = InMemoryStore::new();
        let agg = aggregate("alice@contoso.com");
        let v1 = store.create(&agg).await.unwrap();

        let v2 = store.replace(&agg, &v1).await.unwrap();
        assert_ne!(v1, v2);

        let err = store.replace(&agg, &v1).await.unwrap_err();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::VersionMismatch));
    }

    #[tokio::test]
    async fn replace_of_missing_document_is_a_version_mismatch() {
        let store = InMemoryStore::new();
        let agg = aggregate("alice@contoso.com");
        let err = store
            .replace(&agg, &VersionToken::new("1"))
            .await
            .unwrap_err();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::VersionMismatch));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn calls_are_counted_per_primitive() {
        let store = InMemoryStore::new();
        let agg = aggregate("alice@contoso.com");
        let (p, id) = agg.key();
        let _ = store.lookup(p, id).await;
        let v = store.create(&agg).await.unwrap();
        let _ = store.replace(&agg, &v).await;

        assert_eq!(
            store.calls(),
            StoreCalls {
                lookups: 1,
                creates: 1,
                replaces: 1
            }
        );
        // Direct reads are not counted.
        let _ = store.get(p, id);
        assert_eq!(store.calls().total(), 3);
    }
}
