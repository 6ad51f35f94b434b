#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Goal-seeking collection of product records from several storefronts.
//!
//! A session repeatedly decides which sources still need records, asks each
//! of them for a share of the remaining demand in parallel, deduplicates
//! what comes back, and tracks per-source health so that a storefront that
//! keeps blocking us is isolated instead of stalling everyone else. The
//! loop ends with [`Outcome::Success`](shopscout_collect_models::Outcome)
//! once the global target and every per-source minimum are met, or with a
//! well-formed partial result when attempts or wall-clock time run out.
//!
//! * [`ledger`]: session-wide duplicate detection
//! * [`quota`]: global and per-source progress against the goal
//! * [`health`]: failure streaks, backoff delays, isolation
//! * [`allocator`]: per-attempt demand
//! * [`orchestrator`]: the attempt loop itself
//! * [`sink`]: progress and record consumers
//! * [`config`]: TOML session configuration and source resolution

pub mod allocator;
pub mod config;
pub mod health;
pub mod ledger;
pub mod orchestrator;
pub mod quota;
pub mod sink;

use std::path::PathBuf;

pub use orchestrator::{Orchestrator, OrchestratorConfig, SourceHandle, run};

/// Errors that reject a session before its first attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The source list is empty.
    #[error("No sources configured")]
    NoSources,

    /// Every configured source is disabled.
    #[error("Every configured source is disabled")]
    NoEnabledSources,

    /// Two sources share a name.
    #[error("Source '{0}' is configured more than once")]
    DuplicateSource(String),

    /// A source name does not match any known definition.
    #[error("Unknown source '{name}' (available: {available})")]
    UnknownSource {
        /// The name that was asked for.
        name: String,
        /// Comma-separated list of known source ids.
        available: String,
    },

    /// No search terms were given.
    #[error("No search terms configured")]
    NoSearchTerms,

    /// A numeric setting that must be positive is zero.
    #[error("{field} must be greater than zero")]
    NotPositive {
        /// Config key of the offending setting.
        field: &'static str,
    },

    /// A delay band has `min_ms > max_ms`.
    #[error("Delay band for {name} is inverted ({min_ms}ms > {max_ms}ms)")]
    InvertedDelayBand {
        /// Source name, or the setting the band belongs to.
        name: String,
        /// Configured lower bound.
        min_ms: u64,
        /// Configured upper bound.
        max_ms: u64,
    },

    /// The backoff base exceeds its cap.
    #[error("baseDelayMs ({base_ms}) exceeds capDelayMs ({cap_ms})")]
    BaseDelayAboveCap {
        /// Configured base delay.
        base_ms: u64,
        /// Configured cap.
        cap_ms: u64,
    },

    /// The config file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for a session.
    #[error("Failed to parse session config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A storefront adapter could not be built from its definition.
    #[error(transparent)]
    Source(#[from] shopscout_source::SourceError),
}
