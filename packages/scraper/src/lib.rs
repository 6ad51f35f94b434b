#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Selector-driven extraction of product listings from search result pages.
//!
//! Provides [`listing::ListingExtractor`], which turns a rendered search
//! page into [`RawRecord`] candidates using ordered lists of CSS selectors,
//! plus [`find_block_marker`] for recognizing bot-detection interstitials.
//!
//! This crate is a pure parsing library with no network access. Fetching
//! pages and deciding what a failure means is left to callers.
//!
//! [`RawRecord`]: shopscout_product_models::RawRecord

pub mod listing;

use serde::Deserialize;

/// Errors that can occur while preparing or running an extraction.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// A configured CSS selector failed to parse.
    #[error("invalid CSS selector '{selector}': {message}")]
    InvalidSelector {
        /// The offending selector text.
        selector: String,
        /// Parser error description.
        message: String,
    },

    /// The base URL used to resolve relative links is invalid.
    #[error("invalid base URL '{0}'")]
    InvalidBaseUrl(String),
}

/// Ordered CSS selector lists describing a search result page.
///
/// Each field holds fallbacks tried in order; listing markup changes
/// frequently, so definitions usually carry two or three variants.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingSelectors {
    /// Selectors matching one listing card each. The first selector that
    /// matches anything wins.
    pub item: Vec<String>,
    /// Title text selectors, relative to a card.
    pub title: Vec<String>,
    /// Price text selectors, relative to a card.
    #[serde(default)]
    pub price: Vec<String>,
    /// Link selectors (the `href` attribute is read), relative to a card.
    pub link: Vec<String>,
    /// Image selectors (`src`, falling back to `data-src`), relative to a card.
    #[serde(default)]
    pub image: Vec<String>,
    /// Rating text selectors, relative to a card.
    #[serde(default)]
    pub rating: Vec<String>,
    /// Review count text selectors, relative to a card.
    #[serde(default)]
    pub reviews: Vec<String>,
    /// Seller name selectors, relative to a card.
    #[serde(default)]
    pub seller: Vec<String>,
    /// Availability text selectors, relative to a card.
    #[serde(default)]
    pub availability: Vec<String>,
    /// Attribute on the card element carrying a SKU (e.g., `"data-asin"`).
    #[serde(default)]
    pub sku_attribute: Option<String>,
}

/// Returns the first block marker found in `body`, if any.
///
/// Matching is case-insensitive. Markers are phrases that only appear on
/// CAPTCHA or "access denied" interstitials (e.g., `"robot check"`).
#[must_use]
pub fn find_block_marker<'a>(body: &str, markers: &'a [String]) -> Option<&'a str> {
    let haystack = body.to_lowercase();
    markers
        .iter()
        .find(|marker| !marker.is_empty() && haystack.contains(&marker.to_lowercase()))
        .map(String::as_str)
}
