//! Progress against the session goal.

use shopscout_collect_models::{IsolationPolicy, SessionGoal, SourceState};

/// Computes deficits and totals from the current [`SourceState`] set.
///
/// The tracker holds no counts of its own: `collected_count` on each
/// source state is the single source of truth, and [`Self::record_admitted`]
/// is the only place it grows.
#[derive(Debug, Clone, Copy)]
pub struct QuotaTracker {
    goal: SessionGoal,
    policy: IsolationPolicy,
}

impl QuotaTracker {
    #[must_use]
    pub const fn new(goal: SessionGoal, policy: IsolationPolicy) -> Self {
        Self { goal, policy }
    }

    #[must_use]
    pub const fn goal(&self) -> &SessionGoal {
        &self.goal
    }

    /// `max(0, minPerSource - collectedCount)`.
    #[must_use]
    pub const fn remaining(&self, state: &SourceState) -> u64 {
        self.goal.min_per_source.saturating_sub(state.collected_count)
    }

    /// Total used for the global target. Isolated sources are left out
    /// under [`IsolationPolicy::ExcludeCounts`].
    #[must_use]
    pub fn global_total(&self, states: &[SourceState]) -> u64 {
        states
            .iter()
            .filter(|s| self.policy == IsolationPolicy::RetainCounts || !s.isolated)
            .map(|s| s.collected_count)
            .sum()
    }

    /// `max(0, globalTarget - globalTotal)`.
    #[must_use]
    pub fn global_remaining(&self, states: &[SourceState]) -> u64 {
        self.goal
            .global_target
            .saturating_sub(self.global_total(states))
    }

    /// Active sources that are below their minimum, or any active source
    /// while the global target is unmet.
    #[must_use]
    pub fn needy<'a>(&self, states: &'a [SourceState]) -> Vec<&'a SourceState> {
        let global_unmet = self.global_remaining(states) > 0;
        states
            .iter()
            .filter(|s| s.is_active() && (global_unmet || self.remaining(s) > 0))
            .collect()
    }

    /// Global target met and every active source at its minimum.
    /// Isolated and disabled sources are excused from the minimum.
    #[must_use]
    pub fn goal_reached(&self, states: &[SourceState]) -> bool {
        self.global_remaining(states) == 0
            && states
                .iter()
                .filter(|s| s.is_active())
                .all(|s| self.remaining(s) == 0)
    }

    /// Adds `admitted` newly accepted records to the source's count.
    pub const fn record_admitted(&self, state: &mut SourceState, admitted: u64) {
        state.collected_count += admitted;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn goal(global_target: u64, min_per_source: u64) -> SessionGoal {
        SessionGoal {
            global_target,
            min_per_source,
            max_attempts: 10,
            max_wall_clock: Duration::from_secs(60),
        }
    }

    fn state(name: &str, collected: u64, isolated: bool) -> SourceState {
        let mut state = SourceState::new(name.to_string(), true);
        state.collected_count = collected;
        state.isolated = isolated;
        state
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let quota = QuotaTracker::new(goal(50, 5), IsolationPolicy::RetainCounts);
        assert_eq!(quota.remaining(&state("ebay", 2, false)), 3);
        assert_eq!(quota.remaining(&state("ebay", 9, false)), 0);
    }

    #[test]
    fn isolation_policy_changes_global_total() {
        let states = vec![state("amazon", 10, true), state("ebay", 4, false)];
        let retain = QuotaTracker::new(goal(50, 5), IsolationPolicy::RetainCounts);
        let exclude = QuotaTracker::new(goal(50, 5), IsolationPolicy::ExcludeCounts);
        assert_eq!(retain.global_total(&states), 14);
        assert_eq!(exclude.global_total(&states), 4);
        assert_eq!(exclude.global_remaining(&states), 46);
    }

    #[test]
    fn needy_skips_isolated_and_satisfied_sources() {
        let quota = QuotaTracker::new(goal(10, 5), IsolationPolicy::RetainCounts);
        let states = vec![
            state("amazon", 8, false),
            state("ebay", 2, false),
            state("walmart", 0, true),
        ];
        let needy: Vec<&str> = quota.needy(&states).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(needy, vec!["ebay"]);
    }

    #[test]
    fn every_active_source_is_needy_while_global_unmet() {
        let quota = QuotaTracker::new(goal(50, 5), IsolationPolicy::RetainCounts);
        let states = vec![state("amazon", 20, false), state("ebay", 6, false)];
        assert_eq!(quota.needy(&states).len(), 2);
    }

    #[test]
    fn goal_excuses_isolated_sources_from_minimum() {
        let quota = QuotaTracker::new(goal(10, 5), IsolationPolicy::RetainCounts);
        let states = vec![
            state("amazon", 6, false),
            state("ebay", 6, false),
            state("walmart", 0, true),
        ];
        assert!(quota.goal_reached(&states));
    }

    #[test]
    fn goal_requires_every_active_minimum() {
        let quota = QuotaTracker::new(goal(10, 5), IsolationPolicy::RetainCounts);
        let states = vec![state("amazon", 20, false), state("ebay", 4, false)];
        assert!(!quota.goal_reached(&states));
    }
}
