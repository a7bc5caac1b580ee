use std::time::Duration;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Exponential retry delay: `base * 2^attempt`, no jitter and no cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
}

impl BackoffPolicy {
    pub const DEFAULT_BASE: Duration = Duration::from_secs(5 * 60);

    #[must_use]
    pub const fn new(base: Duration) -> Self {
        Self { base }
    }

    #[must_use]
    pub const fn from_secs(base_secs: u64) -> Self {
        Self::new(Duration::from_secs(base_secs))
    }

    /// Delay before the retry that follows failed attempt number `attempt` (zero-based).
    #[must_use]
    pub const fn delay(&self, attempt: u32) -> Duration {
        let factor = match 1u32.checked_shl(attempt) {
            Some(factor) => factor,
            None => u32::MAX,
        };
        self.base.saturating_mul(factor)
    }

    /// Absolute time of the next attempt, clamped to the largest representable date.
    #[must_use]
    pub fn next_attempt_at(&self, now: OffsetDateTime, attempt: u32) -> OffsetDateTime {
        time::Duration::try_from(self.delay(attempt))
            .ok()
            .and_then(|delay| now.checked_add(delay))
            .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE)
    }
}

/// The default schedule: 5, 10, 20, 40... minutes.
#[must_use]
pub const fn delay(attempt: u32) -> Duration {
    BackoffPolicy::new(BackoffPolicy::DEFAULT_BASE).delay(attempt)
}
