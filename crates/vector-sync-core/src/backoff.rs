//! Retry backoff for failed ingestion runs.
//!
//! After the n-th consecutive failure of a status row, the row may not be
//! retried before `now + min(base * multiplier^(n-1), max)`. The failure
//! counter is reset by a completed run and by a credential rebind, so the
//! next failure starts again from `base`.
//!
//! Defaults: base 60 s, multiplier 2, cap 6 h. No interval exceeds
//! [`MAX_BACKOFF_SECS`].

use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_BASE_SECS: u64 = 60;
pub const DEFAULT_MULTIPLIER: u32 = 2;
pub const DEFAULT_MAX_SECS: u64 = 6 * 60 * 60;
/// Hard ceiling for any configured interval (30 days).
pub const MAX_BACKOFF_SECS: u64 = 30 * 24 * 60 * 60;

/// Exponential backoff policy applied on `running → failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_secs: u64,
    multiplier: u32,
    max_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_secs: DEFAULT_BASE_SECS,
            multiplier: DEFAULT_MULTIPLIER,
            max_secs: DEFAULT_MAX_SECS,
        }
    }
}

impl BackoffPolicy {
    /// Build a policy. Both intervals are clamped into
    /// `1..=MAX_BACKOFF_SECS`, `max_secs` to at least `base_secs` and
    /// `multiplier` to at least 1.
    pub fn new(base_secs: u64, multiplier: u32, max_secs: u64) -> Self {
        let base_secs = base_secs.clamp(1, MAX_BACKOFF_SECS);
        Self {
            base_secs,
            multiplier: multiplier.max(1),
            max_secs: max_secs.clamp(base_secs, MAX_BACKOFF_SECS),
        }
    }

    pub fn base(&self) -> Duration {
        Duration::seconds(self.base_secs as i64)
    }

    pub fn max(&self) -> Duration {
        Duration::seconds(self.max_secs as i64)
    }

    /// Delay after `failures` consecutive failures (0 and 1 both yield `base`).
    pub fn delay(&self, failures: u32) -> Duration {
        let mut secs = self.base_secs;
        if self.multiplier > 1 {
            for _ in 1..failures {
                secs = secs.saturating_mul(self.multiplier as u64);
                if secs >= self.max_secs {
                    return self.max();
                }
            }
        }
        Duration::seconds(secs.min(self.max_secs) as i64)
    }

    /// Earliest retry time. Saturates at the latest representable instant.
    pub fn retry_after(&self, now: DateTime<Utc>, failures: u32) -> DateTime<Utc> {
        now.checked_add_signed(self.delay(failures))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
