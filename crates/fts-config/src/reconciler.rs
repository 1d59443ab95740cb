//! `reconciler:` settings into the reconciler's own types.

use std::time::Duration;

use fts_reconcile::{EventIdentity, RetryPolicy};

use crate::{EventIdentityMode, ReconcilerSettings};

impl From<&ReconcilerSettings> for RetryPolicy {
    fn from(s: &ReconcilerSettings) -> Self {
        RetryPolicy::new(
            s.max_attempts,
            Duration::from_millis(s.backoff_base_ms),
            Duration::from_millis(s.backoff_cap_ms),
        )
    }
}

impl From<EventIdentityMode> for EventIdentity {
    fn from(m: EventIdentityMode) -> Self {
        match m {
            EventIdentityMode::Random => EventIdentity::Random,
            EventIdentityMode::Deterministic => EventIdentity::Deterministic,
        }
    }
}
