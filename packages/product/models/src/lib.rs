#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Product record types and the session-wide deduplication key.
//!
//! Every source adapter produces loosely-typed [`RawRecord`] candidates
//! exactly as a listing page renders them. Candidates that survive field
//! normalization become immutable [`ProductRecord`]s, identified by their
//! [`DedupKey`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A listing candidate as extracted from a source page, before any
/// normalization.
///
/// Every field is optional because listing markup routinely omits or
/// mangles individual fields. Candidates missing a title or URL are dropped
/// during normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    /// The search term that produced this candidate.
    pub search_term: String,
    /// Listing title text.
    pub title: Option<String>,
    /// Price text as rendered (e.g., `"$1,299.99"`).
    pub price_text: Option<String>,
    /// Currency hint from the adapter (e.g., `"USD"`), used when the price
    /// text carries no recognizable symbol.
    pub currency: Option<String>,
    /// Absolute listing URL.
    pub url: Option<String>,
    /// Absolute image URL.
    pub image_url: Option<String>,
    /// Rating text as rendered (e.g., `"4.5 out of 5 stars"`).
    pub rating_text: Option<String>,
    /// Review count text as rendered (e.g., `"(1,234)"`).
    pub reviews_text: Option<String>,
    /// Availability text (e.g., `"In stock"`).
    pub availability: Option<String>,
    /// Seller or shop name.
    pub seller: Option<String>,
    /// Source-specific stock keeping identifier (e.g., an Amazon ASIN).
    pub sku: Option<String>,
}

/// A normalized product listing collected during a session.
///
/// Immutable once created. Identity is `(source, normalized url)`, see
/// [`ProductRecord::dedup_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    /// Name of the source that produced this record (e.g., `"ebay"`).
    pub source: String,
    /// The search term that produced this record.
    pub search_term: String,
    /// Cleaned listing title.
    pub title: String,
    /// Numeric price, when one could be parsed.
    pub price: Option<f64>,
    /// ISO 4217 currency code.
    pub currency: Option<String>,
    /// Listing URL as reported by the source.
    pub url: String,
    /// Image URL.
    pub image_url: Option<String>,
    /// Numeric rating (usually out of 5).
    pub rating: Option<f64>,
    /// Number of reviews.
    pub review_count: Option<u64>,
    /// Availability text.
    pub availability: Option<String>,
    /// Seller or shop name.
    pub seller: Option<String>,
    /// Source-specific stock keeping identifier.
    pub sku: Option<String>,
    /// When the record was collected.
    pub collected_at: DateTime<Utc>,
}

impl ProductRecord {
    /// Returns the session-wide identity of this record.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.source, &self.url)
    }
}

/// The `(source, normalized url)` pair identifying a unique record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupKey {
    /// Source name.
    pub source: String,
    /// URL after [`normalize_url`].
    pub normalized_url: String,
}

impl DedupKey {
    /// Builds a key from a source name and a raw listing URL.
    #[must_use]
    pub fn new(source: &str, url: &str) -> Self {
        Self {
            source: source.to_owned(),
            normalized_url: normalize_url(url),
        }
    }
}

/// Normalizes a listing URL for deduplication.
///
/// Trims whitespace, lowercases the scheme and host, drops the query string
/// and fragment (tracking parameters churn between page loads), and strips a
/// trailing `/` from the path. Strings that do not parse as absolute URLs
/// are trimmed and cut at the first `?` or `#`.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();

    if let Ok(mut parsed) = url::Url::parse(trimmed) {
        parsed.set_query(None);
        parsed.set_fragment(None);

        let path = parsed.path().trim_end_matches('/').to_owned();
        if path.is_empty() {
            parsed.set_path("");
            return parsed.as_str().trim_end_matches('/').to_owned();
        }
        parsed.set_path(&path);
        return parsed.into();
    }

    let cut = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    trimmed[..cut].trim_end_matches('/').to_owned()
}
