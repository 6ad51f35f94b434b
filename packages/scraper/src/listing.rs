//! Listing card extraction.
//!
//! Parses a search result page, locates listing cards via the first item
//! selector that matches, and reads each field from the first fallback
//! selector yielding non-empty content.

use scraper::{ElementRef, Html, Selector};
use shopscout_product_models::RawRecord;
use url::Url;

use crate::{ListingSelectors, ScrapeError};

/// Compiled selectors for one source's search result layout.
#[derive(Debug)]
pub struct ListingExtractor {
    base_url: Url,
    item: Vec<Selector>,
    title: Vec<Selector>,
    price: Vec<Selector>,
    link: Vec<Selector>,
    image: Vec<Selector>,
    rating: Vec<Selector>,
    reviews: Vec<Selector>,
    seller: Vec<Selector>,
    availability: Vec<Selector>,
    sku_attribute: Option<String>,
}

impl ListingExtractor {
    /// Compiles the selector lists. Relative links and image sources are
    /// resolved against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError`] if any selector fails to parse or the base
    /// URL is not absolute.
    pub fn new(selectors: &ListingSelectors, base_url: &str) -> Result<Self, ScrapeError> {
        let base_url =
            Url::parse(base_url).map_err(|_| ScrapeError::InvalidBaseUrl(base_url.to_owned()))?;

        Ok(Self {
            base_url,
            item: compile(&selectors.item)?,
            title: compile(&selectors.title)?,
            price: compile(&selectors.price)?,
            link: compile(&selectors.link)?,
            image: compile(&selectors.image)?,
            rating: compile(&selectors.rating)?,
            reviews: compile(&selectors.reviews)?,
            seller: compile(&selectors.seller)?,
            availability: compile(&selectors.availability)?,
            sku_attribute: selectors.sku_attribute.clone(),
        })
    }

    /// Extracts up to `limit` listing candidates from `html`.
    ///
    /// Returns an empty vector when no item selector matches; callers decide
    /// whether that means the layout changed or the page was a soft block.
    #[must_use]
    pub fn extract(&self, html: &str, search_term: &str, limit: usize) -> Vec<RawRecord> {
        let document = Html::parse_document(html);

        let Some(cards) = self.item.iter().find_map(|sel| {
            let cards: Vec<ElementRef<'_>> = document.select(sel).collect();
            (!cards.is_empty()).then_some(cards)
        }) else {
            log::debug!("no listing cards matched on {}", self.base_url);
            return Vec::new();
        };

        cards
            .into_iter()
            .take(limit)
            .map(|card| self.extract_card(card, search_term))
            .collect()
    }

    fn extract_card(&self, card: ElementRef<'_>, search_term: &str) -> RawRecord {
        RawRecord {
            search_term: search_term.to_owned(),
            title: first_text(card, &self.title),
            price_text: first_text(card, &self.price),
            currency: None,
            url: first_attr(card, &self.link, &["href"]).and_then(|href| self.resolve(&href)),
            image_url: first_attr(card, &self.image, &["src", "data-src"])
                .and_then(|src| self.resolve(&src)),
            rating_text: first_text(card, &self.rating),
            reviews_text: first_text(card, &self.reviews),
            availability: first_text(card, &self.availability),
            seller: first_text(card, &self.seller),
            sku: self
                .sku_attribute
                .as_deref()
                .and_then(|attr| card.value().attr(attr))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        }
    }

    fn resolve(&self, href: &str) -> Option<String> {
        self.base_url.join(href.trim()).ok().map(String::from)
    }
}

fn compile(selectors: &[String]) -> Result<Vec<Selector>, ScrapeError> {
    selectors
        .iter()
        .map(|s| {
            Selector::parse(s).map_err(|e| ScrapeError::InvalidSelector {
                selector: s.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

fn first_text(card: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        card.select(sel).find_map(|el| {
            let text = el.text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            (!text.is_empty()).then_some(text)
        })
    })
}

fn first_attr(card: ElementRef<'_>, selectors: &[Selector], attrs: &[&str]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        card.select(sel).find_map(|el| {
            attrs
                .iter()
                .filter_map(|attr| el.value().attr(attr))
                .map(str::trim)
                .find(|v| !v.is_empty())
                .map(str::to_owned)
        })
    })
}
