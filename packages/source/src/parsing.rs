//! Field parsing and candidate normalization.
//!
//! Listing pages render prices, ratings, and review counts as free text in
//! a handful of regional formats. These helpers turn that text into typed
//! values and promote a [`RawRecord`] into a [`ProductRecord`].

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use shopscout_product_models::{ProductRecord, RawRecord};

/// Longest title kept on a record, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d.,]*").expect("valid regex"));

static DECIMAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("valid regex"));

static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d[\d.,]*)\s?([kKmM])?\b").expect("valid regex"));

/// Why a candidate could not become a [`ProductRecord`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CandidateError {
    /// No usable title.
    #[error("candidate has no title")]
    MissingTitle,

    /// No URL at all.
    #[error("candidate has no URL")]
    MissingUrl,

    /// A URL that is not an absolute http(s) URL.
    #[error("candidate URL '{0}' is not an absolute http(s) URL")]
    InvalidUrl(String),
}

/// Collapses whitespace and caps the length at [`MAX_TITLE_CHARS`].
/// Returns `None` for blank input.
#[must_use]
pub fn clean_title(s: &str) -> Option<String> {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_TITLE_CHARS).collect())
}

/// Parses the first price in `text`.
///
/// Handles `1,299.99`, `1.299,99`, `24,99` (decimal comma), and `1,299`
/// (thousands comma). When both separators appear, the rightmost one is the
/// decimal separator.
#[must_use]
pub fn parse_price(text: &str) -> Option<f64> {
    let token = NUMBER_RE.find(text)?.as_str().trim_end_matches(['.', ',']);

    let last_dot = token.rfind('.');
    let last_comma = token.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => token.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => token.replace(',', ""),
        (None, Some(comma)) if token.len() - comma - 1 == 2 && token.matches(',').count() == 1 => {
            token.replace(',', ".")
        }
        (None, Some(_)) => token.replace(',', ""),
        (Some(dot), None) if token.matches('.').count() > 1 || token.len() - dot - 1 == 3 => {
            // `1.299` and `1.299.000` use the dot as a thousands separator.
            token.replace('.', "")
        }
        _ => token.to_owned(),
    };

    normalized.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Detects an ISO 4217 currency code from a symbol or code in `text`.
#[must_use]
pub fn detect_currency(text: &str) -> Option<&'static str> {
    if text.contains('€') || text.contains("EUR") {
        Some("EUR")
    } else if text.contains('£') || text.contains("GBP") {
        Some("GBP")
    } else if text.contains('$') || text.contains("USD") {
        Some("USD")
    } else {
        None
    }
}

/// Parses the first decimal number in a rating text such as
/// `"4.5 out of 5 stars"`.
#[must_use]
pub fn parse_rating(text: &str) -> Option<f64> {
    let token = DECIMAL_RE.find(text)?.as_str().replace(',', ".");
    token.parse::<f64>().ok().filter(|r| r.is_finite())
}

/// Parses a review count such as `"(2,381)"`, `"1.2K ratings"`, or
/// `"12 reviews"`.
#[must_use]
pub fn parse_review_count(text: &str) -> Option<u64> {
    let caps = COUNT_RE.captures(text)?;
    let digits = caps.get(1)?.as_str().trim_end_matches(['.', ',']);

    let multiplier = match caps.get(2).map(|m| m.as_str()) {
        Some("k" | "K") => 1_000.0,
        Some("m" | "M") => 1_000_000.0,
        _ => return digits.replace([',', '.'], "").parse().ok(),
    };

    let value = digits.replace(',', ".").parse::<f64>().ok()?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((value * multiplier).round() as u64)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty())
}

/// Promotes a raw candidate into a [`ProductRecord`] attributed to `source`.
///
/// # Errors
///
/// Returns [`CandidateError`] when the title is blank or the URL is missing
/// or not an absolute http(s) URL. Unparseable optional fields (price,
/// rating, review count) are left empty instead.
pub fn normalize_candidate(
    source: &str,
    raw: RawRecord,
    collected_at: DateTime<Utc>,
) -> Result<ProductRecord, CandidateError> {
    let title = raw
        .title
        .as_deref()
        .and_then(clean_title)
        .ok_or(CandidateError::MissingTitle)?;

    let url = raw
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(CandidateError::MissingUrl)?;

    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        _ => return Err(CandidateError::InvalidUrl(url.to_owned())),
    }
    let url = url.to_owned();

    let price = raw.price_text.as_deref().and_then(parse_price);
    let currency = raw
        .price_text
        .as_deref()
        .and_then(detect_currency)
        .map(str::to_owned)
        .or(raw.currency);

    Ok(ProductRecord {
        source: source.to_owned(),
        search_term: raw.search_term,
        title,
        price,
        currency,
        url,
        image_url: non_blank(raw.image_url),
        rating: raw.rating_text.as_deref().and_then(parse_rating),
        review_count: raw.reviews_text.as_deref().and_then(parse_review_count),
        availability: non_blank(raw.availability),
        seller: non_blank(raw.seller),
        sku: non_blank(raw.sku),
        collected_at,
    })
}
