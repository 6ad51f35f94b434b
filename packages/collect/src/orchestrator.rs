//! The attempt loop.
//!
//! One attempt allocates demand, fetches from every needy source
//! concurrently, then applies the results one source at a time in name
//! order: candidates are normalized, filtered through the
//! [`DedupLedger`], counted by the [`QuotaTracker`], and failures are fed
//! to the [`HealthTracker`]. Attempts run strictly one after another.
//!
//! All session state (source states, ledger, record sequence, attempt log)
//! lives in a `Session` created when [`Orchestrator::run`] starts and
//! consumed into the [`SessionResult`] when it returns.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use shopscout_collect_models::{
    AttemptProgress, AttemptRecord, DelayBand, IsolationPolicy, Outcome, SessionGoal,
    SessionResult, SourceState, TerminationReason,
};
use shopscout_product_models::{ProductRecord, RawRecord};
use shopscout_source::parsing::normalize_candidate;
use shopscout_source::{FetchFailure, SessionContext, SourceScraper};
use tokio::time::Instant;

use crate::ConfigError;
use crate::allocator::{Allocator, DEFAULT_PER_ATTEMPT_CEILING, Demand};
use crate::health::{HealthTracker, RetryPolicy, sample_band};
use crate::ledger::DedupLedger;
use crate::quota::QuotaTracker;
use crate::sink::{ProgressSink, RecordSink};

/// Default per-invocation fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(90);

/// Default time in-flight fetches may run past the wall-clock budget.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Default random pause between attempts.
pub const DEFAULT_INTER_ATTEMPT_JITTER: DelayBand = DelayBand::new(1_000, 3_000);

/// One source as seen by the orchestrator.
#[derive(Clone)]
pub struct SourceHandle {
    pub name: String,
    pub enabled: bool,
    /// Jitter band added to every backoff delay for this source.
    pub delay_band: DelayBand,
    pub scraper: Arc<dyn SourceScraper>,
}

impl SourceHandle {
    /// An enabled handle named after the scraper's id.
    #[must_use]
    pub fn new(scraper: Arc<dyn SourceScraper>, delay_band: DelayBand) -> Self {
        Self {
            name: scraper.id().to_string(),
            enabled: true,
            delay_band,
            scraper,
        }
    }

    /// Marks the handle disabled; it is kept in the result but never queried.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("delay_band", &self.delay_band)
            .finish_non_exhaustive()
    }
}

/// Loop settings beyond the [`SessionGoal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Terms passed to every fetch.
    pub search_terms: Vec<String>,
    pub retry: RetryPolicy,
    /// Upper bound on records requested from one source per attempt.
    pub per_attempt_ceiling: u64,
    /// Per-invocation timeout, independent of the session wall clock.
    pub fetch_timeout: Duration,
    /// How long in-flight fetches may run past the wall-clock budget.
    pub drain_grace: Duration,
    /// Random pause between attempts.
    pub inter_attempt_jitter: DelayBand,
    pub isolation_policy: IsolationPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            search_terms: Vec::new(),
            retry: RetryPolicy::default(),
            per_attempt_ceiling: DEFAULT_PER_ATTEMPT_CEILING,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            drain_grace: DEFAULT_DRAIN_GRACE,
            inter_attempt_jitter: DEFAULT_INTER_ATTEMPT_JITTER,
            isolation_policy: IsolationPolicy::default(),
        }
    }
}

/// A validated session, ready to run.
#[derive(Debug)]
pub struct Orchestrator {
    goal: SessionGoal,
    config: OrchestratorConfig,
    /// Sorted by name.
    sources: Vec<SourceHandle>,
}

/// Validates the inputs and runs one session to completion.
///
/// # Errors
///
/// Returns [`ConfigError`] before the first attempt if the goal, the
/// sources, or the config are invalid. Source failures never surface here.
pub async fn run(
    goal: SessionGoal,
    sources: Vec<SourceHandle>,
    config: OrchestratorConfig,
    progress: &dyn ProgressSink,
    sink: &mut dyn RecordSink,
) -> Result<SessionResult, ConfigError> {
    let orchestrator = Orchestrator::new(goal, sources, config)?;
    Ok(orchestrator.run(progress, sink).await)
}

impl Orchestrator {
    /// Validates the session inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an empty or all-disabled source list,
    /// duplicate source names, missing search terms, zero targets or
    /// limits, and inverted delay bands.
    pub fn new(
        goal: SessionGoal,
        mut sources: Vec<SourceHandle>,
        mut config: OrchestratorConfig,
    ) -> Result<Self, ConfigError> {
        if sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        if !sources.iter().any(|s| s.enabled) {
            return Err(ConfigError::NoEnabledSources);
        }

        let mut names = BTreeSet::new();
        for source in &sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
            check_band(&source.name, source.delay_band)?;
        }

        config.search_terms = config
            .search_terms
            .iter()
            .map(String::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if config.search_terms.is_empty() {
            return Err(ConfigError::NoSearchTerms);
        }
        if goal.global_target == 0 {
            return Err(ConfigError::NotPositive {
                field: "globalTarget",
            });
        }
        if goal.max_attempts == 0 {
            return Err(ConfigError::NotPositive {
                field: "maxAttempts",
            });
        }
        if goal.max_wall_clock.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "maxWallClockSecs",
            });
        }
        if config.retry.isolation_threshold == 0 {
            return Err(ConfigError::NotPositive {
                field: "isolationThreshold",
            });
        }
        if config.per_attempt_ceiling == 0 {
            return Err(ConfigError::NotPositive {
                field: "perAttemptCeiling",
            });
        }
        if config.fetch_timeout.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "fetchTimeoutSecs",
            });
        }
        if config.retry.base_delay > config.retry.cap_delay {
            return Err(ConfigError::BaseDelayAboveCap {
                base_ms: duration_ms(config.retry.base_delay),
                cap_ms: duration_ms(config.retry.cap_delay),
            });
        }
        check_band("interAttemptJitterMs", config.inter_attempt_jitter)?;

        sources.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            goal,
            config,
            sources,
        })
    }

    /// Runs attempts until the goal is met or a limit is hit.
    ///
    /// Always returns a well-formed result; per-source failures only ever
    /// affect that source's state.
    #[allow(clippy::too_many_lines)]
    pub async fn run(&self, progress: &dyn ProgressSink, sink: &mut dyn RecordSink) -> SessionResult {
        let started = Instant::now();
        let started_at = Utc::now();

        let quota = QuotaTracker::new(self.goal, self.config.isolation_policy);
        let health = HealthTracker::new(
            self.config.retry,
            self.sources
                .iter()
                .map(|s| (s.name.clone(), s.delay_band))
                .collect(),
        );
        let allocator = Allocator::new(self.config.per_attempt_ceiling);
        let mut session = Session::new(&self.sources);

        log::info!(
            "Starting session: target {} records, at least {} per source, up to {} attempts / {}s across {} source(s): {}",
            self.goal.global_target,
            self.goal.min_per_source,
            self.goal.max_attempts,
            self.goal.max_wall_clock.as_secs(),
            self.sources.iter().filter(|s| s.enabled).count(),
            self.sources
                .iter()
                .filter(|s| s.enabled)
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut reason = TerminationReason::AttemptsExhausted;

        for attempt in 1..=self.goal.max_attempts {
            let elapsed = started.elapsed();
            if elapsed >= self.goal.max_wall_clock {
                reason = TerminationReason::WallClockExceeded;
                break;
            }

            let demands = allocator.allocate(&quota, &session.states);
            if demands.is_empty() {
                reason = if quota.goal_reached(&session.states) {
                    TerminationReason::GoalReached
                } else {
                    TerminationReason::NoActiveSources
                };
                break;
            }

            log::info!(
                "Attempt {attempt}/{}: requesting {}",
                self.goal.max_attempts,
                demands
                    .iter()
                    .map(|d| format!("{}={}", d.source, d.requested))
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            let attempt_started_at = Utc::now();
            let remaining_clock = self.goal.max_wall_clock.saturating_sub(elapsed);
            let budget = self
                .config
                .fetch_timeout
                .min(remaining_clock.saturating_add(self.config.drain_grace));
            let contexts: Vec<SessionContext> = demands
                .iter()
                .map(|demand| SessionContext {
                    attempt,
                    session_started_at: started_at,
                    collected_so_far: session
                        .states
                        .iter()
                        .find(|s| s.name == demand.source)
                        .map_or(0, |s| s.collected_count),
                })
                .collect();

            let mut outcomes = self.dispatch(&demands, &contexts, budget).await;
            outcomes.sort_by(|a, b| a.0.source.cmp(&b.0.source));

            let mut record = AttemptRecord {
                attempt_number: attempt,
                started_at: attempt_started_at,
                per_source_requested: demands
                    .iter()
                    .map(|d| (d.source.clone(), d.requested))
                    .collect(),
                per_source_returned: BTreeMap::new(),
                per_source_new: BTreeMap::new(),
                failures: BTreeMap::new(),
                newly_isolated: Vec::new(),
                new_records_count: 0,
                duplicate_count: 0,
                dropped_count: 0,
            };
            let mut longest_delay = Duration::ZERO;

            for (demand, outcome) in outcomes {
                let name = demand.source;
                let failure = match outcome {
                    Ok(candidates) => {
                        let applied = session.admit(&name, candidates, &quota, sink);
                        record
                            .per_source_returned
                            .insert(name.clone(), applied.returned);
                        record.per_source_new.insert(name.clone(), applied.admitted);
                        record.new_records_count += applied.admitted;
                        record.duplicate_count += applied.duplicates;
                        record.dropped_count += applied.dropped;

                        log::info!(
                            "  {name}: {} new, {} duplicate, {} dropped ({} returned)",
                            applied.admitted,
                            applied.duplicates,
                            applied.dropped,
                            applied.returned
                        );

                        if applied.usable() {
                            if let Some(state) = session.state_mut(&name) {
                                health.record_success(state);
                            }
                            None
                        } else {
                            Some(FetchFailure::parsing(format!(
                                "none of {} candidate(s) could be used",
                                applied.returned
                            )))
                        }
                    }
                    Err(failure) => Some(failure),
                };

                let Some(failure) = failure else {
                    continue;
                };
                let kind = failure.kind();
                record.failures.insert(name.clone(), kind);

                let Some(state) = session.state_mut(&name) else {
                    continue;
                };
                let verdict = health.record_failure(state, kind, Utc::now());
                log::warn!(
                    "  {name}: {failure} (streak {}, retry in {:.1}s)",
                    state.consecutive_failures,
                    verdict.delay.as_secs_f64()
                );

                if verdict.newly_isolated {
                    log::warn!(
                        "  {name}: isolated after {} consecutive failure(s); excluded for the rest of the session",
                        state.consecutive_failures
                    );
                    record.newly_isolated.push(name);
                } else {
                    longest_delay = longest_delay.max(verdict.delay);
                }
            }

            let elapsed = started.elapsed();
            progress.on_attempt(&AttemptProgress {
                attempt_number: attempt,
                max_attempts: self.goal.max_attempts,
                per_source_delta: record.per_source_new.clone(),
                total_so_far: session.records.len() as u64,
                global_target: self.goal.global_target,
                elapsed,
            });
            log::info!(
                "Attempt {attempt} done: {} new record(s), {}/{} total",
                record.new_records_count,
                quota.global_total(&session.states),
                self.goal.global_target
            );
            session.attempts.push(record);

            if quota.goal_reached(&session.states) {
                reason = TerminationReason::GoalReached;
                break;
            }
            if !session.states.iter().any(SourceState::is_active) {
                reason = TerminationReason::NoActiveSources;
                break;
            }
            if elapsed >= self.goal.max_wall_clock {
                reason = TerminationReason::WallClockExceeded;
                break;
            }
            if attempt == self.goal.max_attempts {
                reason = TerminationReason::AttemptsExhausted;
                break;
            }

            let wait = longest_delay
                .max(sample_band(self.config.inter_attempt_jitter))
                .min(self.goal.max_wall_clock.saturating_sub(elapsed));
            log::info!("Waiting {:.1}s before next attempt", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }

        let outcome = if quota.goal_reached(&session.states) {
            Outcome::Success
        } else {
            Outcome::Partial
        };
        let result = session.into_result(outcome, reason, started.elapsed());

        self.log_summary(&result);
        if let Err(e) = sink.finish(&result) {
            log::error!("Failed to write session result: {e}");
        }
        progress.on_finish(&result);

        result
    }

    /// Runs one fetch per demand concurrently, each bounded by `budget`.
    /// `contexts` is parallel to `demands`.
    async fn dispatch(
        &self,
        demands: &[Demand],
        contexts: &[SessionContext],
        budget: Duration,
    ) -> Vec<(Demand, Result<Vec<RawRecord>, FetchFailure>)> {
        let terms = &self.config.search_terms;
        join_all(demands.iter().zip(contexts).filter_map(|(demand, context)| {
            let handle = self.sources.iter().find(|s| s.name == demand.source)?;
            Some(async move {
                let fetched = tokio::time::timeout(
                    budget,
                    handle.scraper.fetch(terms, demand.requested, context),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(FetchFailure::transient(format!(
                        "fetch timed out after {:.1}s",
                        budget.as_secs_f64()
                    )))
                });
                (demand.clone(), fetched)
            })
        }))
        .await
    }

    fn log_summary(&self, result: &SessionResult) {
        log::info!(
            "Session finished: {} ({}) with {} record(s) in {} attempt(s), {:.1}s",
            result.outcome,
            result.reason,
            result.records.len(),
            result.attempts_used,
            result.elapsed.as_secs_f64()
        );
        for state in &result.sources {
            let mark = if state.collected_count >= self.goal.min_per_source {
                "✓"
            } else {
                "✗"
            };
            let note = if !state.enabled {
                " (disabled)"
            } else if state.isolated {
                " (isolated)"
            } else {
                ""
            };
            log::info!(
                "  {mark} {}: {}/{}{note}",
                state.name,
                state.collected_count,
                self.goal.min_per_source
            );
        }
    }
}

/// Counts from applying one source's candidates.
#[derive(Debug, Default, Clone, Copy)]
struct Applied {
    returned: u64,
    admitted: u64,
    duplicates: u64,
    dropped: u64,
}

impl Applied {
    /// At least one candidate could be normalized.
    const fn usable(&self) -> bool {
        self.admitted + self.duplicates > 0
    }
}

/// Mutable state of one session.
struct Session {
    /// Sorted by name.
    states: Vec<SourceState>,
    ledger: DedupLedger,
    records: Vec<ProductRecord>,
    attempts: Vec<AttemptRecord>,
}

impl Session {
    fn new(sources: &[SourceHandle]) -> Self {
        Self {
            states: sources
                .iter()
                .map(|s| SourceState::new(s.name.clone(), s.enabled))
                .collect(),
            ledger: DedupLedger::new(),
            records: Vec::new(),
            attempts: Vec::new(),
        }
    }

    fn state_mut(&mut self, name: &str) -> Option<&mut SourceState> {
        self.states.iter_mut().find(|s| s.name == name)
    }

    /// Normalizes and deduplicates one source's candidates, appending the
    /// new ones to the record sequence and streaming them to `sink`.
    fn admit(
        &mut self,
        source: &str,
        candidates: Vec<RawRecord>,
        quota: &QuotaTracker,
        sink: &mut dyn RecordSink,
    ) -> Applied {
        let mut applied = Applied {
            returned: candidates.len() as u64,
            ..Applied::default()
        };
        let collected_at = Utc::now();

        for raw in candidates {
            let record = match normalize_candidate(source, raw, collected_at) {
                Ok(record) => record,
                Err(e) => {
                    log::debug!("  {source}: dropped candidate: {e}");
                    applied.dropped += 1;
                    continue;
                }
            };

            if !self.ledger.admit(&record) {
                applied.duplicates += 1;
                continue;
            }

            if let Err(e) = sink.accept(&record) {
                log::error!("Failed to stream record {}: {e}", record.url);
            }
            self.records.push(record);
            applied.admitted += 1;
        }

        if let Some(state) = self.state_mut(source) {
            quota.record_admitted(state, applied.admitted);
        }
        applied
    }

    fn into_result(
        self,
        outcome: Outcome,
        reason: TerminationReason,
        elapsed: Duration,
    ) -> SessionResult {
        SessionResult {
            per_source_counts: self
                .states
                .iter()
                .map(|s| (s.name.clone(), s.collected_count))
                .collect(),
            attempts_used: u32::try_from(self.attempts.len()).unwrap_or(u32::MAX),
            records: self.records,
            outcome,
            reason,
            elapsed,
            attempts: self.attempts,
            sources: self.states,
        }
    }
}

fn check_band(name: &str, band: DelayBand) -> Result<(), ConfigError> {
    if band.is_valid() {
        Ok(())
    } else {
        Err(ConfigError::InvertedDelayBand {
            name: name.to_string(),
            min_ms: band.min_ms,
            max_ms: band.max_ms,
        })
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use shopscout_collect_models::FailureKind;

    use super::*;
    use crate::sink::{CollectingSink, NullProgressSink, NullRecordSink};

    type Script = Box<dyn Fn(u32) -> Result<Vec<RawRecord>, FetchFailure> + Send + Sync>;

    /// One recorded fetch invocation.
    struct Call {
        context: SessionContext,
        requested: u64,
        terms: Vec<String>,
    }

    /// In-memory source whose response depends only on the attempt number.
    struct FakeSource {
        id: String,
        script: Script,
        latency: Duration,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeSource {
        fn new(
            id: &str,
            script: impl Fn(u32) -> Result<Vec<RawRecord>, FetchFailure> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Self::slow(id, Duration::ZERO, script)
        }

        /// Sleeps `latency` before answering.
        fn slow(
            id: &str,
            latency: Duration,
            script: impl Fn(u32) -> Result<Vec<RawRecord>, FetchFailure> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                script: Box::new(script),
                latency,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn hanging(id: &str) -> Arc<Self> {
            Self::slow(id, Duration::from_secs(3_600), |_| Ok(Vec::new()))
        }

        fn attempts(&self) -> Vec<u32> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.context.attempt)
                .collect()
        }

        fn collected_seen(&self) -> Vec<u64> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.context.collected_so_far)
                .collect()
        }
    }

    #[async_trait]
    impl SourceScraper for FakeSource {
        fn id(&self) -> &str {
            &self.id
        }

        async fn fetch(
            &self,
            search_terms: &[String],
            requested: u64,
            context: &SessionContext,
        ) -> Result<Vec<RawRecord>, FetchFailure> {
            self.calls.lock().unwrap().push(Call {
                context: context.clone(),
                requested,
                terms: search_terms.to_vec(),
            });
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            (self.script)(context.attempt)
        }
    }

    fn raw(source: &str, n: u32) -> RawRecord {
        RawRecord {
            search_term: "headphones".to_string(),
            title: Some(format!("{source} item {n}")),
            price_text: Some("$19.99".to_string()),
            url: Some(format!("https://www.{source}.com/p/{n}")),
            ..RawRecord::default()
        }
    }

    /// `per_attempt` fresh records every attempt.
    fn steady(source: &'static str, per_attempt: u32) -> Arc<FakeSource> {
        slow_steady(source, per_attempt, Duration::ZERO)
    }

    fn slow_steady(source: &'static str, per_attempt: u32, latency: Duration) -> Arc<FakeSource> {
        FakeSource::slow(source, latency, move |attempt| {
            let start = (attempt - 1) * per_attempt;
            Ok((start..start + per_attempt).map(|n| raw(source, n)).collect())
        })
    }

    fn blocked(source: &'static str) -> Arc<FakeSource> {
        FakeSource::new(source, |_| Err(FetchFailure::blocked("HTTP 429")))
    }

    fn handle(source: &Arc<FakeSource>) -> SourceHandle {
        SourceHandle::new(source.clone(), DelayBand::zero())
    }

    fn goal(global_target: u64, min_per_source: u64, max_attempts: u32) -> SessionGoal {
        SessionGoal {
            global_target,
            min_per_source,
            max_attempts,
            max_wall_clock: Duration::from_secs(600),
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            search_terms: vec!["headphones".to_string()],
            ..OrchestratorConfig::default()
        }
    }

    async fn run_session(
        goal: SessionGoal,
        sources: Vec<SourceHandle>,
        config: OrchestratorConfig,
    ) -> SessionResult {
        run(goal, sources, config, &NullProgressSink, &mut NullRecordSink)
            .await
            .unwrap()
    }

    fn assert_well_formed(result: &SessionResult, goal: &SessionGoal) {
        assert!(result.attempts_used <= goal.max_attempts);
        assert_eq!(result.attempts.len() as u32, result.attempts_used);
        assert_eq!(result.total(), result.records.len() as u64);

        let keys: HashSet<_> = result.records.iter().map(ProductRecord::dedup_key).collect();
        assert_eq!(keys.len(), result.records.len());

        for (i, attempt) in result.attempts.iter().enumerate() {
            assert_eq!(attempt.attempt_number as usize, i + 1);
            assert_eq!(
                attempt.new_records_count,
                attempt.per_source_new.values().sum::<u64>()
            );
        }
        for (source, count) in &result.per_source_counts {
            let from_log: u64 = result
                .attempts
                .iter()
                .filter_map(|a| a.per_source_new.get(source))
                .sum();
            assert_eq!(*count, from_log, "{source}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_steady_sources_reach_target_on_fourth_attempt() {
        let amazon = steady("amazon", 8);
        let ebay = steady("ebay", 5);
        let goal = goal(50, 5, 20);

        let result = run_session(goal, vec![handle(&amazon), handle(&ebay)], config()).await;

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.reason, TerminationReason::GoalReached);
        assert_eq!(result.attempts_used, 4);
        assert_eq!(result.per_source_counts["amazon"], 32);
        assert_eq!(result.per_source_counts["ebay"], 20);
        assert_eq!(result.records.len(), 52);
        assert_well_formed(&result, &goal);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_source_is_isolated_and_excused() {
        let amazon = steady("amazon", 5);
        let ebay = steady("ebay", 5);
        let walmart = blocked("walmart");
        let goal = goal(50, 5, 20);
        let config = OrchestratorConfig {
            retry: RetryPolicy {
                blocked_penalty: 1,
                ..RetryPolicy::default()
            },
            ..config()
        };

        let result = run_session(
            goal,
            vec![handle(&amazon), handle(&ebay), handle(&walmart)],
            config,
        )
        .await;

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(walmart.attempts(), vec![1, 2, 3, 4]);
        assert_eq!(result.attempts[3].newly_isolated, vec!["walmart".to_string()]);
        for attempt in &result.attempts[4..] {
            assert!(!attempt.per_source_requested.contains_key("walmart"));
        }

        let walmart_state = result.sources.iter().find(|s| s.name == "walmart").unwrap();
        assert!(walmart_state.isolated);
        assert_eq!(walmart_state.collected_count, 0);
        assert_eq!(walmart_state.last_failure, Some(FailureKind::Blocked));
        assert_eq!(result.per_source_counts["amazon"], 25);
        assert_eq!(result.per_source_counts["ebay"], 25);
        assert_well_formed(&result, &goal);
    }

    #[tokio::test(start_paused = true)]
    async fn resubmitted_records_are_not_counted_twice() {
        // Every attempt re-lists item 0 next to one fresh item.
        let ebay = FakeSource::new("ebay", |attempt| {
            Ok(vec![raw("ebay", 0), raw("ebay", attempt)])
        });
        let goal = goal(5, 1, 20);

        let result = run_session(goal, vec![handle(&ebay)], config()).await;

        assert_eq!(result.attempts[0].new_records_count, 2);
        for attempt in &result.attempts[1..] {
            assert_eq!(attempt.new_records_count, 1);
            assert_eq!(attempt.duplicate_count, 1);
        }
        assert_eq!(result.attempts_used, 4);
        assert_eq!(result.per_source_counts["ebay"], 5);
        assert_well_formed(&result, &goal);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_is_partial_with_accurate_counts() {
        let amazon = steady("amazon", 2);
        let ebay = steady("ebay", 3);
        let goal = goal(50, 5, 3);

        let result = run_session(goal, vec![handle(&amazon), handle(&ebay)], config()).await;

        assert_eq!(result.outcome, Outcome::Partial);
        assert_eq!(result.reason, TerminationReason::AttemptsExhausted);
        assert_eq!(result.attempts_used, 3);
        assert_eq!(result.per_source_counts["amazon"], 6);
        assert_eq!(result.per_source_counts["ebay"], 9);
        assert_eq!(result.records.len(), 15);
        assert_well_formed(&result, &goal);
    }

    #[tokio::test(start_paused = true)]
    async fn target_alone_is_not_success_until_every_minimum_is_met() {
        let amazon = steady("amazon", 20);
        let ebay = steady("ebay", 1);
        let goal = goal(10, 5, 20);

        let result = run_session(goal, vec![handle(&amazon), handle(&ebay)], config()).await;

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.attempts_used, 5);
        assert_eq!(amazon.attempts(), vec![1]);
        assert_eq!(ebay.attempts(), vec![1, 2, 3, 4, 5]);
        assert_eq!(result.per_source_counts["ebay"], 5);
        assert_well_formed(&result, &goal);
    }

    #[tokio::test(start_paused = true)]
    async fn flaky_source_recovers_and_counts_only_grow() {
        let amazon = FakeSource::new("amazon", |attempt| {
            if attempt % 2 == 0 {
                Err(FetchFailure::transient("connection reset"))
            } else {
                Ok((0..4).map(|n| raw("amazon", attempt * 10 + n)).collect())
            }
        });
        let ebay = steady("ebay", 2);
        let goal = goal(30, 5, 20);

        let result = run_session(goal, vec![handle(&amazon), handle(&ebay)], config()).await;

        assert_eq!(result.outcome, Outcome::Success);
        let amazon_state = result.sources.iter().find(|s| s.name == "amazon").unwrap();
        assert!(!amazon_state.isolated);
        assert_eq!(result.attempts[1].failures["amazon"], FailureKind::Transient);
        assert_well_formed(&result, &goal);
    }

    #[tokio::test(start_paused = true)]
    async fn every_source_isolated_ends_partial() {
        let walmart = blocked("walmart");
        let etsy = blocked("etsy");
        let goal = goal(50, 5, 20);

        let result = run_session(goal, vec![handle(&walmart), handle(&etsy)], config()).await;

        assert_eq!(result.outcome, Outcome::Partial);
        assert_eq!(result.reason, TerminationReason::NoActiveSources);
        // Blocked adds 2 to the streak; the default threshold is 4.
        assert_eq!(result.attempts_used, 2);
        assert!(result.records.is_empty());
        assert_well_formed(&result, &goal);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_fetch_times_out_as_transient() {
        let amazon = FakeSource::hanging("amazon");
        let ebay = steady("ebay", 5);
        let goal = goal(10, 0, 2);

        let result = run_session(goal, vec![handle(&amazon), handle(&ebay)], config()).await;

        assert_eq!(result.attempts[0].failures["amazon"], FailureKind::Transient);
        assert_eq!(result.per_source_counts["ebay"], 10);
        assert_eq!(result.outcome, Outcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_budget_stops_the_session() {
        let amazon = FakeSource::hanging("amazon");
        let goal = SessionGoal {
            max_wall_clock: Duration::from_secs(30),
            ..goal(50, 5, 20)
        };

        let started = Instant::now();
        let result = run_session(goal, vec![handle(&amazon)], config()).await;

        assert_eq!(result.outcome, Outcome::Partial);
        assert_eq!(result.reason, TerminationReason::WallClockExceeded);
        assert_eq!(result.attempts_used, 1);
        // 30s budget plus the default 5s drain grace.
        assert!(started.elapsed() <= Duration::from_secs(36));
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_candidates_are_dropped_without_counting() {
        let ebay = FakeSource::new("ebay", |attempt| {
            let mut broken = raw("ebay", 1000 + attempt);
            broken.url = None;
            Ok(vec![broken, raw("ebay", attempt)])
        });
        let goal = goal(3, 1, 20);

        let result = run_session(goal, vec![handle(&ebay)], config()).await;

        assert_eq!(result.attempts_used, 3);
        assert!(result.attempts.iter().all(|a| a.dropped_count == 1));
        assert!(result.attempts.iter().all(|a| a.failures.is_empty()));
        assert_eq!(result.per_source_counts["ebay"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn only_unusable_candidates_is_a_parsing_failure() {
        let etsy = FakeSource::new("etsy", |_| {
            Ok(vec![RawRecord {
                search_term: "mug".to_string(),
                ..RawRecord::default()
            }])
        });
        let goal = goal(5, 1, 6);

        let result = run_session(goal, vec![handle(&etsy)], config()).await;

        let state = &result.sources[0];
        assert_eq!(state.consecutive_failures, 0);
        assert!(!state.isolated);
        assert_eq!(result.attempts_used, 6);
        assert!(
            result
                .attempts
                .iter()
                .all(|a| a.failures.get("etsy") == Some(&FailureKind::Parsing))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exclude_counts_policy_drops_isolated_totals() {
        let script = |attempt: u32| -> Result<Vec<RawRecord>, FetchFailure> {
            if attempt == 1 {
                Ok((0..10).map(|n| raw("amazon", n)).collect())
            } else {
                Err(FetchFailure::blocked("robot check"))
            }
        };
        let goal = goal(12, 1, 20);
        let retry = RetryPolicy {
            isolation_threshold: 1,
            ..RetryPolicy::default()
        };

        let retain = run_session(
            goal,
            vec![
                handle(&FakeSource::new("amazon", script)),
                handle(&steady("ebay", 1)),
            ],
            OrchestratorConfig { retry, ..config() },
        )
        .await;
        assert_eq!(retain.outcome, Outcome::Success);
        assert_eq!(retain.attempts_used, 2);

        let exclude = run_session(
            goal,
            vec![
                handle(&FakeSource::new("amazon", script)),
                handle(&steady("ebay", 1)),
            ],
            OrchestratorConfig {
                retry,
                isolation_policy: IsolationPolicy::ExcludeCounts,
                ..config()
            },
        )
        .await;
        assert_eq!(exclude.outcome, Outcome::Success);
        assert_eq!(exclude.attempts_used, 12);
        assert_eq!(exclude.per_source_counts["amazon"], 10);
        assert_eq!(exclude.records.len(), 22);
        assert_well_formed(&exclude, &goal);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_sources_are_never_queried() {
        let amazon = steady("amazon", 10);
        let etsy = steady("etsy", 10);
        let goal = goal(10, 5, 20);

        let result = run_session(
            goal,
            vec![handle(&amazon), handle(&etsy).disabled()],
            config(),
        )
        .await;

        assert_eq!(result.outcome, Outcome::Success);
        assert!(etsy.attempts().is_empty());
        assert_eq!(result.per_source_counts["etsy"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn streams_records_in_admission_order_and_reports_each_attempt() {
        struct Counting(Mutex<Vec<u32>>);
        impl ProgressSink for Counting {
            fn on_attempt(&self, progress: &AttemptProgress) {
                self.0.lock().unwrap().push(progress.attempt_number);
            }
        }

        let progress = Counting(Mutex::new(Vec::new()));
        let mut sink = CollectingSink::default();
        let result = run(
            goal(12, 1, 20),
            vec![handle(&steady("amazon", 3)), handle(&steady("ebay", 2))],
            config(),
            &progress,
            &mut sink,
        )
        .await
        .unwrap();

        assert_eq!(*progress.0.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(sink.records, result.records);
        assert_eq!(sink.result.as_ref(), Some(&result));
        assert_eq!(sink.records[0].source, "amazon");
        assert_eq!(sink.records[3].source, "ebay");
    }

    #[tokio::test(start_paused = true)]
    async fn request_amounts_follow_remaining_demand() {
        let amazon = steady("amazon", 8);
        let ebay = steady("ebay", 5);

        run_session(goal(50, 5, 20), vec![handle(&amazon), handle(&ebay)], config()).await;

        let requested: Vec<u64> = amazon
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.requested)
            .collect();
        // 50/2, then ceil(37/2), ceil(24/2), ceil(11/2).
        assert_eq!(requested, vec![25, 19, 12, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_within_an_attempt_overlap() {
        let amazon = slow_steady("amazon", 5, Duration::from_secs(10));
        let ebay = slow_steady("ebay", 5, Duration::from_secs(10));

        let started = Instant::now();
        let result =
            run_session(goal(10, 5, 1), vec![handle(&amazon), handle(&ebay)], config()).await;

        assert_eq!(result.outcome, Outcome::Success);
        // Two 10s fetches back to back would take 20s.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn results_apply_in_name_order_not_completion_order() {
        let amazon = slow_steady("amazon", 2, Duration::from_secs(5));
        let ebay = slow_steady("ebay", 2, Duration::from_secs(1));
        let mut sink = CollectingSink::default();

        let result = run(
            goal(4, 1, 1),
            vec![handle(&ebay), handle(&amazon)],
            config(),
            &NullProgressSink,
            &mut sink,
        )
        .await
        .unwrap();

        let order: Vec<&str> = sink.records.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(order, vec!["amazon", "amazon", "ebay", "ebay"]);
        assert_eq!(sink.records, result.records);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_context_carries_the_sources_own_count() {
        let amazon = steady("amazon", 8);
        let ebay = steady("ebay", 1);

        run_session(goal(50, 5, 3), vec![handle(&amazon), handle(&ebay)], config()).await;

        assert_eq!(amazon.collected_seen(), vec![0, 8, 16]);
        assert_eq!(ebay.collected_seen(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn attempt_start_is_stamped_before_fetching() {
        let amazon = slow_steady("amazon", 5, Duration::from_millis(300));
        let before = Utc::now();

        let result = run_session(goal(5, 5, 1), vec![handle(&amazon)], config()).await;

        let started_at = result.attempts[0].started_at;
        assert!(started_at >= before);
        assert!(
            result.records[0].collected_at - started_at >= chrono::Duration::milliseconds(300)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_wall_clock_is_accepted() {
        let amazon = steady("amazon", 10);
        let goal = SessionGoal {
            max_wall_clock: Duration::from_secs(u64::MAX),
            ..goal(10, 5, 20)
        };

        let result = run_session(goal, vec![handle(&amazon)], config()).await;

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.attempts_used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_search_terms_are_not_sent() {
        let amazon = steady("amazon", 5);
        let config = OrchestratorConfig {
            search_terms: vec![String::new(), " kettle ".to_string(), "  ".to_string()],
            ..config()
        };

        run_session(goal(5, 5, 1), vec![handle(&amazon)], config).await;

        let calls = amazon.calls.lock().unwrap();
        assert_eq!(calls[0].terms, vec!["kettle".to_string()]);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let amazon = steady("amazon", 1);

        assert!(matches!(
            Orchestrator::new(goal(50, 5, 20), vec![], config()),
            Err(ConfigError::NoSources)
        ));
        assert!(matches!(
            Orchestrator::new(goal(50, 5, 20), vec![handle(&amazon).disabled()], config()),
            Err(ConfigError::NoEnabledSources)
        ));
        assert!(matches!(
            Orchestrator::new(goal(50, 5, 20), vec![handle(&amazon), handle(&amazon)], config()),
            Err(ConfigError::DuplicateSource(name)) if name == "amazon"
        ));
        assert!(matches!(
            Orchestrator::new(goal(0, 5, 20), vec![handle(&amazon)], config()),
            Err(ConfigError::NotPositive { field: "globalTarget" })
        ));
        assert!(matches!(
            Orchestrator::new(goal(50, 5, 0), vec![handle(&amazon)], config()),
            Err(ConfigError::NotPositive { field: "maxAttempts" })
        ));
        assert!(matches!(
            Orchestrator::new(
                goal(50, 5, 20),
                vec![handle(&amazon)],
                OrchestratorConfig::default()
            ),
            Err(ConfigError::NoSearchTerms)
        ));
        assert!(matches!(
            Orchestrator::new(
                goal(50, 5, 20),
                vec![handle(&amazon)],
                OrchestratorConfig {
                    search_terms: vec![String::new(), "   ".to_string()],
                    ..config()
                }
            ),
            Err(ConfigError::NoSearchTerms)
        ));
        assert!(matches!(
            Orchestrator::new(
                goal(50, 5, 20),
                vec![SourceHandle::new(amazon.clone(), DelayBand::new(9, 1))],
                config()
            ),
            Err(ConfigError::InvertedDelayBand { .. })
        ));
        assert!(Orchestrator::new(goal(50, 0, 20), vec![handle(&amazon)], config()).is_ok());
    }
}
