//! Retry and dead-letter policy for queued operations.
//!
//! The default policy retries every failure forever with no delay between
//! drains. Thresholds and backoff are opt-in.

use std::time::Duration;

use super::types::RemoteErrorKind;

/// Exponential delay between drains after consecutive failing passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay after `consecutive_failures` failing drains (`base * 2^(n-1)`,
    /// capped at `max`). Zero failures means no delay.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exp = (consecutive_failures - 1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// When to give up on a queued operation.
///
/// Only dispatched operations count attempts. An operation deferred behind a
/// failed predecessor on the same record is not charged for that pass. Once
/// the predecessor is dead-lettered, dependents are dispatched again; an
/// update or delete aimed at a placeholder whose insert was dead-lettered then
/// fails transiently ("not reconciled") on every pass. The default policy
/// retries it forever; set `max_attempts` to dead-letter such orphans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts after which an operation is dead-lettered
    /// (default: `None`, retry forever).
    pub max_attempts: Option<u32>,
    /// Dead-letter on the first permanent failure (default: false).
    pub dead_letter_permanent: bool,
    /// Delay drains after failing passes (default: none).
    pub backoff: Option<Backoff>,
}

impl RetryPolicy {
    /// Retry forever, never dead-letter.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn should_dead_letter(&self, kind: &RemoteErrorKind, attempts: u32) -> bool {
        if self.dead_letter_permanent && *kind == RemoteErrorKind::Permanent {
            return true;
        }
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}
