//! Storefronts spread across many independent shop domains.
//!
//! A [`MultiDomainSource`] answers for one source id but searches each
//! configured domain in turn until the requested count is reached.

use async_trait::async_trait;
use shopscout_product_models::RawRecord;

use crate::source_def::{HtmlSearchSource, SourceDefinition};
use crate::{FetchFailure, SessionContext, SourceError, SourceScraper};

/// One source id backed by a scraper per shop domain.
pub struct MultiDomainSource {
    id: String,
    domains: Vec<(String, Box<dyn SourceScraper>)>,
}

impl MultiDomainSource {
    /// Wraps `(domain, scraper)` pairs, searched in the given order.
    #[must_use]
    pub fn new(id: impl Into<String>, domains: Vec<(String, Box<dyn SourceScraper>)>) -> Self {
        Self {
            id: id.into(),
            domains,
        }
    }

    /// Builds an [`HtmlSearchSource`] for every domain from `definition`.
    /// An empty `domains` list falls back to the definition's own
    /// `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if a domain is invalid or its adapter cannot
    /// be built.
    pub fn from_definition(
        definition: &SourceDefinition,
        domains: &[String],
    ) -> Result<Self, SourceError> {
        let fallback = [definition.base_url.clone()];
        let domains = if domains.is_empty() {
            &fallback[..]
        } else {
            domains
        };

        let scrapers = domains
            .iter()
            .map(|domain| -> Result<(String, Box<dyn SourceScraper>), SourceError> {
                let scraper: Box<dyn SourceScraper> =
                    Box::new(HtmlSearchSource::new(definition.for_domain(domain)?)?);
                Ok((domain.trim().to_string(), scraper))
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "[{}] searching {} shop domain(s)",
            definition.id(),
            scrapers.len()
        );
        Ok(Self::new(definition.id(), scrapers))
    }
}

impl std::fmt::Debug for MultiDomainSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiDomainSource")
            .field("id", &self.id)
            .field(
                "domains",
                &self.domains.iter().map(|(d, _)| d).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[async_trait]
impl SourceScraper for MultiDomainSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(
        &self,
        search_terms: &[String],
        requested: u64,
        context: &SessionContext,
    ) -> Result<Vec<RawRecord>, FetchFailure> {
        let mut candidates: Vec<RawRecord> = Vec::new();
        let mut failures: Vec<FetchFailure> = Vec::new();

        for (domain, scraper) in &self.domains {
            let remaining = requested.saturating_sub(candidates.len() as u64);
            if remaining == 0 {
                break;
            }

            match scraper.fetch(search_terms, remaining, context).await {
                Ok(found) => {
                    log::debug!("[{}] {domain}: {} candidates", self.id, found.len());
                    candidates.extend(found.into_iter().map(|mut candidate| {
                        if candidate.seller.is_none() {
                            candidate.seller = Some(domain.clone());
                        }
                        candidate
                    }));
                }
                Err(failure) => {
                    log::warn!("[{}] {domain}: {failure}", self.id);
                    failures.push(failure);
                }
            }
        }

        if !candidates.is_empty() {
            return Ok(candidates);
        }

        // A blocked domain makes the whole invocation blocked.
        let blocked = failures
            .iter()
            .position(|f| matches!(f, FetchFailure::Blocked { .. }));
        Err(match blocked {
            Some(index) => failures.swap_remove(index),
            None => failures.pop().unwrap_or_else(|| {
                FetchFailure::parsing(format!("no shop domains configured for {}", self.id))
            }),
        })
    }
}
