//! Candidate extraction from listing payloads
//!
//! Two strategies are available:
//! - [`PatternExtractor`] scans the raw payload text for `/r/<name>` paths
//!   followed by `/` or `"`. Works on HTML and JSON alike.
//! - [`LinkExtractor`] parses HTML and reads community paths out of anchor
//!   targets.
//!
//! Both return normalized identities; anything that fails normalization is
//! dropped. Extraction never fails; unparseable input yields an empty set.

use crate::config::ExtractStrategy;
use crate::identity::normalize_identity;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use url::Url;

/// Produces candidate identities from a listing payload
pub trait Extractor: Send + Sync {
    fn extract(&self, payload: &str) -> BTreeSet<String>;
}

/// Builds the extractor for a configured strategy
pub fn build_extractor(
    strategy: ExtractStrategy,
    base_url: &Url,
) -> Result<Box<dyn Extractor>, regex::Error> {
    Ok(match strategy {
        ExtractStrategy::Pattern => Box::new(PatternExtractor::new()?),
        ExtractStrategy::Links => Box::new(LinkExtractor::new(base_url.clone())),
    })
}

/// Regex scan over raw payload text
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    pattern: Regex,
}

impl PatternExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r#"/r/([A-Za-z0-9_]{3,21})(?:/|")"#)?,
        })
    }
}

impl Extractor for PatternExtractor {
    fn extract(&self, payload: &str) -> BTreeSet<String> {
        self.pattern
            .captures_iter(payload)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| normalize_identity(m.as_str()))
            .collect()
    }
}

/// Anchor-target scan over parsed HTML
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    base_url: Url,
}

impl LinkExtractor {
    /// `base_url` resolves relative anchors
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }
}

impl Extractor for LinkExtractor {
    fn extract(&self, payload: &str) -> BTreeSet<String> {
        let document = Html::parse_document(payload);
        let mut found = BTreeSet::new();

        if let Ok(anchors) = Selector::parse("a[href]") {
            for element in document.select(&anchors) {
                if let Some(href) = element.value().attr("href") {
                    if let Some(identity) = community_from_href(href, &self.base_url) {
                        found.insert(identity);
                    }
                }
            }
        }

        found
    }
}

/// Resolves an anchor target and reads the community from an `/r/<name>` path
///
/// Returns None for:
/// - javascript:, mailto:, tel:, data: links
/// - fragment-only links
/// - non-HTTP(S) URLs after resolution
/// - paths that don't start with `/r/<name>`
fn community_from_href(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    let mut segments = url.path_segments()?;
    if segments.next()? != "r" {
        return None;
    }
    normalize_identity(segments.next()?)
}
