//! fts-reconcile
//!
//! Event-to-aggregate reconciliation for transfer lifecycle notifications.
//!
//! Architectural decisions:
//! - One aggregate document per transfer id, stored in the partition of the principal that first reported it
//! - Lookup is by transfer id across partitions; writes go back to the owning partition
//! - First sighting creates via conditional create; later sightings append via conditional replace
//! - No in-process locking: the store's conditional writes are the only mutual exclusion
//! - Any write conflict restarts the whole {lookup, mutate, write} transaction, bounded by [`RetryPolicy`]
//! - Malformed payloads are rejected before the store is touched
//!
//! The store is a trait ([`AggregateStore`]); [`InMemoryStore`] backs tests and
//! local runs, `fts-db` provides the Postgres implementation.

mod classify;
mod engine;
pub mod memory;
mod policy;
mod store;

pub use classify::{classify, DecodeError};
pub use engine::{Disposition, EventReconciler, ReconcileError, ReconcileOutcome};
pub use memory::{InMemoryStore, StoreCalls};
pub use policy::{derive_event_id, EventIdentity, RetryPolicy};
pub use store::{AggregateStore, ConflictKind, StoreError};
