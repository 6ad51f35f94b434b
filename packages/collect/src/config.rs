//! Session configuration.
//!
//! A session is described by a TOML file with camelCase keys. Every key is
//! optional and falls back to the documented default. The platform list can
//! be overridden by the `--sources` flag or the [`SOURCES_ENV`] environment
//! variable, in that order of precedence.
//!
//! ```toml
//! platforms = ["amazon", "ebay", "shopify"]
//! searchTerms = ["wireless headphones"]
//! shopifyDomains = ["allbirds.com", "gymshark.com"]
//! globalTarget = 50
//! minPerSource = 5
//! isolationPolicy = "retainCounts"
//!
//! [delayBands.amazon]
//! minMs = 5000
//! maxMs = 15000
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shopscout_collect_models::{
    DEFAULT_GLOBAL_TARGET, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_WALL_CLOCK, DEFAULT_MIN_PER_SOURCE,
    DelayBand, IsolationPolicy, SessionGoal,
};
use shopscout_source::SourceScraper;
use shopscout_source::multi_domain::MultiDomainSource;
use shopscout_source::registry;
use shopscout_source::source_def::{HtmlSearchSource, SourceDefinition};

use crate::ConfigError;
use crate::allocator::DEFAULT_PER_ATTEMPT_CEILING;
use crate::health::{
    DEFAULT_BASE_DELAY, DEFAULT_BLOCKED_PENALTY, DEFAULT_CAP_DELAY, DEFAULT_ISOLATION_THRESHOLD,
    RetryPolicy,
};
use crate::orchestrator::{
    DEFAULT_DRAIN_GRACE, DEFAULT_FETCH_TIMEOUT, DEFAULT_INTER_ATTEMPT_JITTER, OrchestratorConfig,
    SourceHandle,
};

/// Environment variable holding a comma-separated platform list.
pub const SOURCES_ENV: &str = "SHOPSCOUT_SOURCES";

/// Everything needed to start a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Source ids to query. Empty means every embedded source.
    pub platforms: Vec<String>,
    pub search_terms: Vec<String>,
    pub global_target: u64,
    pub min_per_source: u64,
    pub max_attempts: u32,
    pub max_wall_clock_secs: u64,
    pub isolation_threshold: u32,
    pub per_attempt_ceiling: u64,
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
    pub blocked_penalty: u32,
    pub fetch_timeout_secs: u64,
    pub drain_grace_secs: u64,
    /// `[min, max]` pause between attempts, in milliseconds.
    pub inter_attempt_jitter_ms: [u64; 2],
    pub isolation_policy: IsolationPolicy,
    /// Per-source overrides of the definition's delay band.
    pub delay_bands: BTreeMap<String, DelayBand>,
    /// Shop domains searched by multi-domain sources (Shopify). Empty means
    /// the definition's fallback domain.
    pub shopify_domains: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            platforms: Vec::new(),
            search_terms: Vec::new(),
            global_target: DEFAULT_GLOBAL_TARGET,
            min_per_source: DEFAULT_MIN_PER_SOURCE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_wall_clock_secs: DEFAULT_MAX_WALL_CLOCK.as_secs(),
            isolation_threshold: DEFAULT_ISOLATION_THRESHOLD,
            per_attempt_ceiling: DEFAULT_PER_ATTEMPT_CEILING,
            base_delay_ms: duration_ms(DEFAULT_BASE_DELAY),
            cap_delay_ms: duration_ms(DEFAULT_CAP_DELAY),
            blocked_penalty: DEFAULT_BLOCKED_PENALTY,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            drain_grace_secs: DEFAULT_DRAIN_GRACE.as_secs(),
            inter_attempt_jitter_ms: [
                DEFAULT_INTER_ATTEMPT_JITTER.min_ms,
                DEFAULT_INTER_ATTEMPT_JITTER.max_ms,
            ],
            isolation_policy: IsolationPolicy::default(),
            delay_bands: BTreeMap::new(),
            shopify_domains: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Reads and parses a session config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is not a valid session config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses a session config from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML or unknown keys.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::de::from_str(toml_str)?)
    }

    /// Replaces the platform list with `filter` (comma separated) when one
    /// is given.
    pub fn apply_platform_filter(&mut self, filter: Option<&str>) {
        if let Some(filter) = filter {
            self.platforms = split_list(filter)
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect();
        }
    }

    #[must_use]
    pub fn goal(&self) -> SessionGoal {
        SessionGoal {
            global_target: self.global_target,
            min_per_source: self.min_per_source,
            max_attempts: self.max_attempts,
            max_wall_clock: Duration::from_secs(self.max_wall_clock_secs),
        }
    }

    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let [jitter_min, jitter_max] = self.inter_attempt_jitter_ms;
        OrchestratorConfig {
            search_terms: self.search_terms.clone(),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(self.base_delay_ms),
                cap_delay: Duration::from_millis(self.cap_delay_ms),
                isolation_threshold: self.isolation_threshold,
                blocked_penalty: self.blocked_penalty,
            },
            per_attempt_ceiling: self.per_attempt_ceiling,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            drain_grace: Duration::from_secs(self.drain_grace_secs),
            inter_attempt_jitter: DelayBand::new(jitter_min, jitter_max),
            isolation_policy: self.isolation_policy,
        }
    }

    /// Picks the definitions named by `platforms` out of `available`, in
    /// the order they were listed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownSource`] if a platform or a
    /// `delayBands` key matches no definition.
    pub fn select_definitions(
        &self,
        available: Vec<SourceDefinition>,
    ) -> Result<Vec<SourceDefinition>, ConfigError> {
        let unknown = |name: &str| ConfigError::UnknownSource {
            name: name.to_string(),
            available: available
                .iter()
                .map(SourceDefinition::id)
                .collect::<Vec<_>>()
                .join(", "),
        };

        if let Some(name) = self
            .delay_bands
            .keys()
            .find(|name| !available.iter().any(|d| d.id() == name.as_str()))
        {
            return Err(unknown(name.as_str()));
        }

        if self.platforms.is_empty() {
            return Ok(available);
        }

        self.platforms
            .iter()
            .map(|name| {
                available
                    .iter()
                    .find(|d| d.id() == name)
                    .cloned()
                    .ok_or_else(|| unknown(name.as_str()))
            })
            .collect()
    }

    /// Builds one adapter per selected embedded definition, applying any
    /// `delayBands` override. Multi-domain definitions search every entry
    /// of `shopifyDomains`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unknown source names or a definition
    /// whose adapter cannot be built.
    pub fn build_handles(&self) -> Result<Vec<SourceHandle>, ConfigError> {
        self.select_definitions(registry::all_sources())?
            .into_iter()
            .map(|definition| -> Result<SourceHandle, ConfigError> {
                let band = self
                    .delay_bands
                    .get(definition.id())
                    .copied()
                    .unwrap_or_else(|| definition.delay_band());
                let scraper: Arc<dyn SourceScraper> = if definition.multi_domain {
                    Arc::new(MultiDomainSource::from_definition(
                        &definition,
                        &self.shopify_domains,
                    )?)
                } else {
                    Arc::new(HtmlSearchSource::new(definition)?)
                };
                Ok(SourceHandle::new(scraper, band))
            })
            .collect()
    }
}

/// Returns the platform filter to apply: the CLI value if given, else the
/// [`SOURCES_ENV`] environment variable.
#[must_use]
pub fn platform_filter(cli_filter: Option<String>) -> Option<String> {
    cli_filter.or_else(|| std::env::var(SOURCES_ENV).ok())
}

/// Splits a comma-separated list, dropping blank entries.
#[must_use]
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
