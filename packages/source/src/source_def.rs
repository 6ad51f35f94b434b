//! Config-driven storefront definitions.
//!
//! [`SourceDefinition`] captures everything unique about a storefront's
//! search page in a serializable config struct: where the search lives,
//! which selectors pick out listing cards, which phrases betray a bot wall,
//! and how long to pause between requests. A single generic adapter,
//! [`HtmlSearchSource`], serves every definition.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use shopscout_collect_models::DelayBand;
use shopscout_product_models::RawRecord;
use shopscout_scraper::listing::ListingExtractor;
use shopscout_scraper::{ListingSelectors, find_block_marker};

use crate::{FetchFailure, SessionContext, SourceError, SourceScraper, http};

/// Placeholder replaced by the URL-encoded search term in `search_path`.
pub const QUERY_PLACEHOLDER: &str = "{query}";

/// Default per-request timeout when a definition does not set one.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// A complete, config-driven storefront definition.
///
/// Loaded from TOML files at compile time by the [`crate::registry`].
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDefinition {
    /// Unique identifier (e.g., `"ebay"`).
    pub id: String,
    /// Human-readable name (e.g., `"eBay"`).
    pub name: String,
    /// Storefront origin, used to resolve relative links.
    pub base_url: String,
    /// Search path appended to `base_url`, containing [`QUERY_PLACEHOLDER`].
    pub search_path: String,
    /// Currency assumed when a price carries no symbol.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Default random pause band between requests to this storefront.
    pub delay_band: DelayBand,
    /// Lowercase phrases that only appear on CAPTCHA / access-denied pages.
    #[serde(default)]
    pub block_markers: Vec<String>,
    /// Extra HTTP headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout in seconds.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// The storefront software runs on many independent shop domains.
    /// `base_url` is then only the fallback domain; see
    /// [`SourceDefinition::for_domain`].
    #[serde(default)]
    pub multi_domain: bool,
    /// Listing card selectors.
    pub selectors: ListingSelectors,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl SourceDefinition {
    /// Returns the unique source identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the human-readable source name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the default delay band for this storefront.
    #[must_use]
    pub const fn delay_band(&self) -> DelayBand {
        self.delay_band
    }

    /// Builds the search URL for `term`.
    #[must_use]
    pub fn search_url(&self, term: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(term.trim().as_bytes()).collect();
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.search_path.replace(QUERY_PLACEHOLDER, &encoded)
        )
    }

    /// Copies the definition with `base_url` pointed at `domain`. A bare
    /// host such as `"shop.example.com"` is given an `https://` scheme.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Invalid`] if `domain` is not a usable origin.
    pub fn for_domain(&self, domain: &str) -> Result<Self, SourceError> {
        let domain = domain.trim().trim_end_matches('/');
        let origin = if domain.starts_with("https://") || domain.starts_with("http://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        };

        let parsed = url::Url::parse(&origin).map_err(|e| SourceError::Invalid {
            id: self.id.clone(),
            message: format!("invalid shop domain '{domain}': {e}"),
        })?;
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(SourceError::Invalid {
                id: self.id.clone(),
                message: format!("shop domain '{domain}' has no host"),
            });
        }

        Ok(Self {
            base_url: origin,
            ..self.clone()
        })
    }

    /// Checks the definition for mistakes TOML parsing cannot catch.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), SourceError> {
        let invalid = |message: &str| SourceError::Invalid {
            id: self.id.clone(),
            message: message.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id is empty"));
        }
        if !self.search_path.contains(QUERY_PLACEHOLDER) {
            return Err(invalid("search_path has no {query} placeholder"));
        }
        if !self.delay_band.is_valid() {
            return Err(invalid("delay_band.min_ms exceeds delay_band.max_ms"));
        }
        if self.selectors.item.is_empty()
            || self.selectors.title.is_empty()
            || self.selectors.link.is_empty()
        {
            return Err(invalid("item, title, and link selectors are required"));
        }
        Ok(())
    }
}

/// Parses and validates a TOML source definition.
///
/// # Errors
///
/// Returns [`SourceError`] if the TOML is malformed or the definition is
/// invalid.
pub fn parse_source_toml(toml_str: &str) -> Result<SourceDefinition, SourceError> {
    let definition: SourceDefinition = toml::de::from_str(toml_str)?;
    definition.validate()?;
    Ok(definition)
}

/// [`SourceScraper`] serving any HTML [`SourceDefinition`].
///
/// Search terms are tried in order until `requested` candidates have been
/// gathered.
#[derive(Debug)]
pub struct HtmlSearchSource {
    definition: SourceDefinition,
    extractor: ListingExtractor,
    client: reqwest::Client,
}

impl HtmlSearchSource {
    /// Compiles the definition's selectors and builds its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if a selector, the base URL, or a header is
    /// invalid, or the client cannot be built.
    pub fn new(definition: SourceDefinition) -> Result<Self, SourceError> {
        let extractor = ListingExtractor::new(&definition.selectors, &definition.base_url)?;

        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in &definition.headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                SourceError::Invalid {
                    id: definition.id.clone(),
                    message: format!("invalid header name '{key}': {e}"),
                }
            })?;
            let val = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                SourceError::Invalid {
                    id: definition.id.clone(),
                    message: format!("invalid header value for '{key}': {e}"),
                }
            })?;
            header_map.insert(name, val);
        }

        let timeout = Duration::from_secs(
            definition
                .request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        );
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            definition,
            extractor,
            client,
        })
    }

    /// Returns the underlying definition.
    #[must_use]
    pub const fn definition(&self) -> &SourceDefinition {
        &self.definition
    }

    /// Turns one fetched search page into candidates.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure::Blocked`] when the page carries a block
    /// marker.
    pub fn process_page(
        &self,
        body: &str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, FetchFailure> {
        if let Some(marker) = find_block_marker(body, &self.definition.block_markers) {
            return Err(FetchFailure::blocked(format!(
                "block marker '{marker}' on {} search page",
                self.definition.name
            )));
        }

        let mut candidates = self.extractor.extract(body, term, limit);
        for candidate in &mut candidates {
            candidate.currency = Some(self.definition.currency.clone());
        }
        Ok(candidates)
    }
}

#[async_trait]
impl SourceScraper for HtmlSearchSource {
    fn id(&self) -> &str {
        &self.definition.id
    }

    async fn fetch(
        &self,
        search_terms: &[String],
        requested: u64,
        context: &SessionContext,
    ) -> Result<Vec<RawRecord>, FetchFailure> {
        let wanted = usize::try_from(requested).unwrap_or(usize::MAX);
        let mut candidates: Vec<RawRecord> = Vec::new();
        let mut last_failure: Option<FetchFailure> = None;

        for term in search_terms {
            let remaining = wanted.saturating_sub(candidates.len());
            if remaining == 0 {
                break;
            }

            let url = self.definition.search_url(term);
            log::debug!(
                "[{}] attempt {}: GET {url}",
                self.definition.id,
                context.attempt
            );

            let page = http::get_text(|| self.client.get(&url))
                .await
                .and_then(|body| self.process_page(&body, term, remaining));

            match page {
                Ok(mut found) => {
                    log::debug!(
                        "[{}] '{term}': {} candidates",
                        self.definition.id,
                        found.len()
                    );
                    candidates.append(&mut found);
                }
                Err(failure) => {
                    log::warn!("[{}] '{term}': {failure}", self.definition.id);
                    let blocked = matches!(failure, FetchFailure::Blocked { .. });
                    last_failure = Some(failure);
                    // A bot wall on one term will be up for the next one too.
                    if blocked {
                        break;
                    }
                }
            }
        }

        if !candidates.is_empty() {
            return Ok(candidates);
        }

        Err(last_failure.unwrap_or_else(|| {
            FetchFailure::parsing(format!(
                "no listing cards found on {} for {} search term(s)",
                self.definition.name,
                search_terms.len()
            ))
        }))
    }
}
