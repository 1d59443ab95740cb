use std::time::Duration;

use fts_schemas::ClassifiedEvent;
use uuid::Uuid;

/// Bounded retry for conflict-driven restarts of a reconciliation.
///
/// Attempt `n` (1-based) that ends in a conflict waits
/// `min(backoff_cap, backoff_base * 2^(n-1))` before attempt `n + 1`.
/// After `max_attempts` conflicting attempts the reconciliation fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(25);
    pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(1);

    /// `max_attempts` below 1 is clamped to 1 (a single attempt, no retry).
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_cap,
        }
    }

    /// Retries immediately. Used by tests and by the CLI replay path.
    pub fn no_backoff(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the `attempt`-th conflicting attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_ATTEMPTS,
            Self::DEFAULT_BACKOFF_BASE,
            Self::DEFAULT_BACKOFF_CAP,
        )
    }
}

/// How a reconciliation names the event it records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventIdentity {
    /// Fresh UUIDv4 per reconciliation. A redelivered notification becomes a
    /// second log entry.
    #[default]
    Random,
    /// [`derive_event_id`]. A redelivered notification is recognised and
    /// not appended again.
    Deterministic,
}

impl EventIdentity {
    pub fn event_id(&self, event: &ClassifiedEvent) -> Uuid {
        match self {
            EventIdentity::Random => Uuid::new_v4(),
            EventIdentity::Deterministic => derive_event_id(event),
        }
    }
}

/// Stable event id from the notification fields that identify it.
///
/// UUIDv5 over the DNS namespace; the `"fts.transfer-event.v1"` prefix scopes
/// the derivation so it cannot collide with other v5 ids.
pub fn derive_event_id(event: &ClassifiedEvent) -> Uuid {
    let data = format!(
        "fts.transfer-event.v1|{}|{}|{}|{}",
        event.subject,
        event.event_type,
        event.event_time.to_rfc3339(),
        event.transfer_id()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, data.as_bytes())
}
