//! Shared runtime state for fts-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Everything mutable in
//! here is an atomic counter; aggregate state lives in the store only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use fts_config::ServiceConfig;
use fts_reconcile::{
    AggregateStore, Disposition, EventIdentity, EventReconciler, InMemoryStore, RetryPolicy,
};
use serde::{Deserialize, Serialize};

/// Store handle as the daemon sees it: one backend chosen at boot.
pub type SharedStore = Arc<dyn AggregateStore>;

pub type Reconciler = EventReconciler<SharedStore>;

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Delivery counters
// ---------------------------------------------------------------------------

/// Monotonic per-process counters, one per delivery outcome.
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    received: AtomicU64,
    committed: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    validations: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub received: u64,
    /// Created or appended.
    pub committed: u64,
    pub duplicates: u64,
    /// Undecodable notifications, acknowledged and discarded.
    pub dropped: u64,
    /// Store failures and exhausted retries.
    pub failed: u64,
    pub validations: u64,
}

impl DeliveryCounters {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, disposition: Disposition) {
        match disposition {
            Disposition::Duplicate => self.duplicates.fetch_add(1, Ordering::Relaxed),
            Disposition::Created | Disposition::Appended => {
                self.committed.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation(&self) {
        self.validations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            validations: self.validations.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub build: BuildInfo,
    pub reconciler: Reconciler,
    /// Hash of the configuration the process booted with.
    pub config_hash: String,
    pub counters: DeliveryCounters,
    started_at: Instant,
}

impl AppState {
    pub fn new(store: SharedStore, cfg: &ServiceConfig, config_hash: impl Into<String>) -> Self {
        let reconciler = EventReconciler::new(store)
            .with_policy(RetryPolicy::from(&cfg.reconciler))
            .with_identity(EventIdentity::from(cfg.reconciler.event_identity));

        Self {
            build: BuildInfo {
                service: "fts-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            reconciler,
            config_hash: config_hash.into(),
            counters: DeliveryCounters::default(),
            started_at: Instant::now(),
        }
    }

    /// Default configuration over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            &ServiceConfig::default(),
            "unhashed",
        )
    }

    pub fn store(&self) -> &SharedStore {
        self.reconciler.store()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
