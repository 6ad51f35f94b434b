#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Source scraper capability and storefront adapters.
//!
//! Each storefront is reached through the [`SourceScraper`] trait. The
//! collection loop only sees what the trait returns: a list of
//! [`RawRecord`] candidates or a classified [`FetchFailure`]. How a page is
//! retrieved and parsed stays behind the trait.
//!
//! Config-driven HTML storefronts ([`source_def::HtmlSearchSource`]) are
//! loaded from TOML definitions embedded in the [`registry`]. Storefront
//! software hosted on many shop domains is searched domain by domain through
//! [`multi_domain::MultiDomainSource`].

pub mod http;
pub mod multi_domain;
pub mod parsing;
pub mod progress;
pub mod registry;
pub mod source_def;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shopscout_collect_models::FailureKind;
use shopscout_product_models::RawRecord;

/// Errors raised while loading or building source definitions.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A TOML definition failed to parse.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A selector or base URL in the definition is invalid.
    #[error("Scraper setup error: {0}")]
    Scrape(#[from] shopscout_scraper::ScrapeError),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// The definition is well-formed TOML but semantically invalid.
    #[error("Invalid source definition '{id}': {message}")]
    Invalid {
        /// Definition identifier.
        id: String,
        /// Description of what went wrong.
        message: String,
    },
}

/// A failed fetch invocation, classified by how the collection loop should
/// react to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    /// Timeout, connection reset, or server error. Retried next attempt.
    #[error("transient failure: {message}")]
    Transient {
        /// Description of what went wrong.
        message: String,
    },

    /// Rate limiting or a bot-detection interstitial.
    #[error("blocked: {message}")]
    Blocked {
        /// Description of the block signal.
        message: String,
    },

    /// The page arrived but no candidate could be extracted from it.
    #[error("parsing failure: {message}")]
    Parsing {
        /// Description of what could not be parsed.
        message: String,
    },
}

impl FetchFailure {
    /// Creates a [`FetchFailure::Transient`].
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a [`FetchFailure::Blocked`].
    pub fn blocked(message: impl Into<String>) -> Self {
        Self::Blocked {
            message: message.into(),
        }
    }

    /// Creates a [`FetchFailure::Parsing`].
    pub fn parsing(message: impl Into<String>) -> Self {
        Self::Parsing {
            message: message.into(),
        }
    }

    /// The serializable classification of this failure.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Transient { .. } => FailureKind::Transient,
            Self::Blocked { .. } => FailureKind::Blocked,
            Self::Parsing { .. } => FailureKind::Parsing,
        }
    }
}

/// Read-only view of the session handed to every fetch invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// The attempt this invocation belongs to (1-based).
    pub attempt: u32,
    /// When the session started.
    pub session_started_at: DateTime<Utc>,
    /// Records already admitted from this source.
    pub collected_so_far: u64,
}

/// A storefront that can be asked for product listings.
///
/// Implementations must not touch session state: an invocation is a pure
/// function of its arguments returning data, and may be called again in a
/// later attempt with the same search terms.
#[async_trait]
pub trait SourceScraper: Send + Sync {
    /// Returns a unique identifier for this source (e.g., `"ebay"`).
    fn id(&self) -> &str;

    /// Fetches up to `requested` listing candidates for `search_terms`.
    ///
    /// Returning more or fewer candidates than requested is allowed; the
    /// count is best-effort.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] classifying why nothing usable came back.
    async fn fetch(
        &self,
        search_terms: &[String],
        requested: u64,
        context: &SessionContext,
    ) -> Result<Vec<RawRecord>, FetchFailure>;
}
