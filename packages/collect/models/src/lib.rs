#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Session goal, per-source state, attempt log, and result types.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shopscout_product_models::ProductRecord;
use strum_macros::{AsRefStr, Display, EnumString};

/// Default number of records the whole session aims for.
pub const DEFAULT_GLOBAL_TARGET: u64 = 50;

/// Default minimum number of records expected from every source.
pub const DEFAULT_MIN_PER_SOURCE: u64 = 5;

/// Default upper bound on attempts in one session.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default session wall-clock budget.
pub const DEFAULT_MAX_WALL_CLOCK: Duration = Duration::from_secs(600);

/// Classification of a failed fetch invocation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Timeout, connection reset, server hiccup.
    Transient,
    /// Rate limiting or bot detection.
    Blocked,
    /// The page arrived but nothing could be extracted from it.
    Parsing,
}

/// How sources that have been isolated contribute to the global total.
///
/// Records already admitted from an isolated source always remain in the
/// output; the policy only affects the total used to decide whether the
/// session still needs records.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum IsolationPolicy {
    /// Isolated sources keep counting toward the global total.
    #[default]
    RetainCounts,
    /// Isolated sources are removed from the global total.
    ExcludeCounts,
}

/// Uniform random delay band, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayBand {
    /// Lower bound (inclusive).
    #[serde(alias = "min_ms")]
    pub min_ms: u64,
    /// Upper bound (inclusive).
    #[serde(alias = "max_ms")]
    pub max_ms: u64,
}

impl DelayBand {
    /// Creates a band spanning `min_ms..=max_ms`.
    #[must_use]
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// A band that never adds any delay.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    /// Whether `min_ms <= max_ms`.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.min_ms <= self.max_ms
    }
}

impl Default for DelayBand {
    fn default() -> Self {
        Self::new(2_000, 8_000)
    }
}

/// What a session is trying to achieve. Immutable for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGoal {
    /// Total number of unique records wanted across all sources.
    pub global_target: u64,
    /// Minimum number of records wanted from every active source.
    pub min_per_source: u64,
    /// Hard cap on the number of attempts.
    pub max_attempts: u32,
    /// Hard cap on session duration.
    pub max_wall_clock: Duration,
}

impl Default for SessionGoal {
    fn default() -> Self {
        Self {
            global_target: DEFAULT_GLOBAL_TARGET,
            min_per_source: DEFAULT_MIN_PER_SOURCE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_wall_clock: DEFAULT_MAX_WALL_CLOCK,
        }
    }
}

/// Progress and health of one source within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceState {
    /// Source name.
    pub name: String,
    /// Disabled sources are never queried.
    pub enabled: bool,
    /// Unique records admitted from this source. Never decreases.
    pub collected_count: u64,
    /// Failure streak; reset by any successful invocation.
    pub consecutive_failures: u32,
    /// Permanently excluded from further requests this session.
    pub isolated: bool,
    /// Earliest time the source should be queried again.
    pub next_eligible_at: Option<DateTime<Utc>>,
    /// Classification of the most recent failure.
    pub last_failure: Option<FailureKind>,
}

impl SourceState {
    /// Fresh state for a source at session start.
    #[must_use]
    pub const fn new(name: String, enabled: bool) -> Self {
        Self {
            name,
            enabled,
            collected_count: 0,
            consecutive_failures: 0,
            isolated: false,
            next_eligible_at: None,
            last_failure: None,
        }
    }

    /// Enabled and not isolated.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.enabled && !self.isolated
    }
}

/// Sealed log entry for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// Records requested from each dispatched source.
    pub per_source_requested: BTreeMap<String, u64>,
    /// Candidates returned by each source that answered.
    pub per_source_returned: BTreeMap<String, u64>,
    /// Newly admitted records per source.
    pub per_source_new: BTreeMap<String, u64>,
    /// Failure classification per failed source.
    pub failures: BTreeMap<String, FailureKind>,
    /// Sources isolated as a result of this attempt.
    pub newly_isolated: Vec<String>,
    /// Total newly admitted records.
    pub new_records_count: u64,
    /// Candidates rejected as already seen this session.
    pub duplicate_count: u64,
    /// Candidates dropped because fields could not be extracted.
    pub dropped_count: u64,
}

/// How a session ended.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Global target met and every active source reached its minimum.
    Success,
    /// The session stopped before the goal was met.
    Partial,
}

/// Why the attempt loop stopped.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    /// Goal reached.
    GoalReached,
    /// `max_attempts` attempts were used.
    AttemptsExhausted,
    /// `max_wall_clock` elapsed.
    WallClockExceeded,
    /// Every source was isolated before the goal was reached.
    NoActiveSources,
}

/// Final output of a session, materialized exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    /// Unique records in admission order.
    pub records: Vec<ProductRecord>,
    /// Records admitted per source.
    pub per_source_counts: BTreeMap<String, u64>,
    /// Number of attempts run.
    pub attempts_used: u32,
    /// Success or partial success.
    pub outcome: Outcome,
    /// Why the loop stopped.
    pub reason: TerminationReason,
    /// Session duration.
    pub elapsed: Duration,
    /// Attempt log.
    pub attempts: Vec<AttemptRecord>,
    /// Final state of every source.
    pub sources: Vec<SourceState>,
}

impl SessionResult {
    /// Total number of records collected.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.per_source_counts.values().sum()
    }
}

/// Notification emitted after every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptProgress {
    /// The attempt just evaluated.
    pub attempt_number: u32,
    /// Configured attempt cap.
    pub max_attempts: u32,
    /// Newly admitted records per source in this attempt.
    pub per_source_delta: BTreeMap<String, u64>,
    /// Records collected so far across all sources.
    pub total_so_far: u64,
    /// Configured global target.
    pub global_target: u64,
    /// Time since session start.
    pub elapsed: Duration,
}
