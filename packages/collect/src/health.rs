//! Per-source failure streaks, backoff delays, and isolation.
//!
//! Every failed invocation is classified by the source adapter:
//!
//! * [`FailureKind::Transient`] adds one to the streak and waits only the
//!   source's own jitter band before it is tried again.
//! * [`FailureKind::Blocked`] adds [`RetryPolicy::blocked_penalty`] to the
//!   streak and waits `min(base * 2^streak, cap)` plus jitter.
//! * [`FailureKind::Parsing`] leaves the streak untouched.
//!
//! A source whose streak reaches [`RetryPolicy::isolation_threshold`] is
//! isolated for the rest of the session.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng as _;
use shopscout_collect_models::{DelayBand, FailureKind, SourceState};

/// Default number of consecutive failures before a source is isolated.
pub const DEFAULT_ISOLATION_THRESHOLD: u32 = 4;

/// Default streak increment for a blocked invocation.
pub const DEFAULT_BLOCKED_PENALTY: u32 = 2;

/// Default base of the exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default ceiling of the exponential backoff.
pub const DEFAULT_CAP_DELAY: Duration = Duration::from_secs(60);

/// Backoff and isolation settings shared by every source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base of the exponential backoff.
    pub base_delay: Duration,
    /// Upper bound of the exponential part of a delay.
    pub cap_delay: Duration,
    /// Streak at which a source is isolated.
    pub isolation_threshold: u32,
    /// Streak increment for a blocked invocation.
    pub blocked_penalty: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            cap_delay: DEFAULT_CAP_DELAY,
            isolation_threshold: DEFAULT_ISOLATION_THRESHOLD,
            blocked_penalty: DEFAULT_BLOCKED_PENALTY,
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^streak, cap)`.
    #[must_use]
    pub fn exponential_delay(&self, streak: u32) -> Duration {
        let factor = 1u32.checked_shl(streak).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.cap_delay)
    }
}

/// What [`HealthTracker::record_failure`] decided for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureVerdict {
    /// How long to wait before the source is queried again.
    pub delay: Duration,
    /// Whether this failure isolated the source.
    pub newly_isolated: bool,
}

/// Applies the [`RetryPolicy`] to source states.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    policy: RetryPolicy,
    bands: BTreeMap<String, DelayBand>,
}

impl HealthTracker {
    /// Creates a tracker with per-source jitter `bands`. Sources without an
    /// entry get no jitter.
    #[must_use]
    pub const fn new(policy: RetryPolicy, bands: BTreeMap<String, DelayBand>) -> Self {
        Self { policy, bands }
    }

    /// Jitter band configured for `source`.
    #[must_use]
    pub fn band(&self, source: &str) -> DelayBand {
        self.bands.get(source).copied().unwrap_or_else(DelayBand::zero)
    }

    /// Resets the failure streak after a successful invocation.
    pub fn record_success(&self, state: &mut SourceState) {
        state.consecutive_failures = 0;
        state.next_eligible_at = None;
    }

    /// Updates the streak for a failed invocation, computes the next delay,
    /// and isolates the source once the streak reaches the threshold.
    pub fn record_failure(
        &self,
        state: &mut SourceState,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> FailureVerdict {
        let jitter = sample_band(self.band(&state.name));

        let delay = match kind {
            FailureKind::Transient => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                jitter
            }
            FailureKind::Blocked => {
                state.consecutive_failures = state
                    .consecutive_failures
                    .saturating_add(self.policy.blocked_penalty);
                self.policy
                    .exponential_delay(state.consecutive_failures)
                    .saturating_add(jitter)
            }
            FailureKind::Parsing => jitter,
        };

        state.last_failure = Some(kind);
        state.next_eligible_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d));

        let newly_isolated =
            !state.isolated && state.consecutive_failures >= self.policy.isolation_threshold;
        if newly_isolated {
            state.isolated = true;
        }

        FailureVerdict {
            delay,
            newly_isolated,
        }
    }
}

/// Uniform random duration within `band`.
#[must_use]
pub fn sample_band(band: DelayBand) -> Duration {
    if band.max_ms <= band.min_ms {
        return Duration::from_millis(band.min_ms);
    }
    Duration::from_millis(rand::rng().random_range(band.min_ms..=band.max_ms))
}
