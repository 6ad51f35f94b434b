//! Per-attempt demand allocation.

use std::cmp::Reverse;

use shopscout_collect_models::SourceState;

use crate::quota::QuotaTracker;

/// Default upper bound on records requested from one source per attempt.
pub const DEFAULT_PER_ATTEMPT_CEILING: u64 = 50;

/// How many records to ask one source for in one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demand {
    pub source: String,
    pub requested: u64,
}

/// Greedy deficit-first allocator.
///
/// Each needy source is asked for
/// `min(max(remaining(source), ceil(globalRemaining / needy)), ceiling)`.
/// Demands are ordered by descending per-source deficit, then by
/// descending distance from an equal share of the global target, then by
/// name.
#[derive(Debug, Clone, Copy)]
pub struct Allocator {
    per_attempt_ceiling: u64,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(DEFAULT_PER_ATTEMPT_CEILING)
    }
}

impl Allocator {
    #[must_use]
    pub const fn new(per_attempt_ceiling: u64) -> Self {
        Self {
            per_attempt_ceiling,
        }
    }

    /// Builds the demand map for the next attempt. Empty when no source is
    /// needy.
    #[must_use]
    pub fn allocate(&self, quota: &QuotaTracker, states: &[SourceState]) -> Vec<Demand> {
        let needy = quota.needy(states);
        if needy.is_empty() {
            return Vec::new();
        }

        let active = states.iter().filter(|s| s.is_active()).count() as u64;
        let equal_share = quota.goal().global_target.div_ceil(active.max(1));
        let proportional = quota
            .global_remaining(states)
            .div_ceil(needy.len() as u64);

        let mut ranked: Vec<(u64, u64, &SourceState)> = needy
            .into_iter()
            .map(|s| {
                (
                    quota.remaining(s),
                    equal_share.saturating_sub(s.collected_count),
                    s,
                )
            })
            .collect();
        ranked.sort_by(|(a_deficit, a_distance, a), (b_deficit, b_distance, b)| {
            (Reverse(a_deficit), Reverse(a_distance), &a.name).cmp(&(
                Reverse(b_deficit),
                Reverse(b_distance),
                &b.name,
            ))
        });

        ranked
            .into_iter()
            .map(|(deficit, _, s)| Demand {
                source: s.name.clone(),
                requested: deficit.max(proportional).min(self.per_attempt_ceiling),
            })
            .collect()
    }
}
