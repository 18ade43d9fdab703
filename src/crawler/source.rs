//! Upstream access behind two seams
//!
//! [`ListingSource`] turns a frontier target into a raw listing payload and
//! [`DescribeSource`] resolves identities into their metric and flag. The
//! crawl loop and the verifier only see these traits, so tests can swap in
//! in-memory fakes. [`RedditSource`] implements both over the shared
//! [`Fetcher`].

use crate::crawler::fetcher::{FetchFailure, Fetcher};
use crate::crawler::frontier::FrontierTarget;
use crate::identity::normalize_identity;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// A fetched listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Raw payload handed to the extractor
    pub payload: String,
    /// Pagination cursor for the next page of this listing, if any
    pub next_cursor: Option<String>,
}

/// Authoritative metadata for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Description {
    pub metric: u64,
    pub flag: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Whether the failure means the pass should stop issuing requests
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Fetch(FetchFailure::Throttled) | Self::Fetch(FetchFailure::Cancelled)
        )
    }
}

/// Fetches listing pages
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn list(&self, target: &FrontierTarget) -> Result<Listing, SourceError>;
}

/// Resolves identities into authoritative metadata
#[async_trait]
pub trait DescribeSource: Send + Sync {
    /// Looks up one identity
    ///
    /// `Ok(None)` means the upstream positively reports that the identity does
    /// not exist or is not accessible.
    async fn describe(&self, identity: &str) -> Result<Option<Description>, SourceError>;

    /// Looks up a group of identities in one request
    ///
    /// Identities absent from the returned map were not recognized by the
    /// upstream. The default falls back to one `describe` per identity.
    async fn describe_many(
        &self,
        identities: &[String],
    ) -> Result<HashMap<String, Description>, SourceError> {
        let mut found = HashMap::new();
        for identity in identities {
            if let Some(description) = self.describe(identity).await? {
                found.insert(identity.clone(), description);
            }
        }
        Ok(found)
    }
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    kind: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct ThingListing<T> {
    children: Vec<Thing<T>>,
}

#[derive(Debug, Deserialize)]
struct About {
    display_name: Option<String>,
    subscribers: Option<u64>,
    over18: Option<bool>,
}

impl About {
    /// Both fields must come from the upstream; nothing is filled in
    fn description(&self) -> Result<Description, SourceError> {
        match (self.subscribers, self.over18) {
            (Some(metric), Some(flag)) => Ok(Description { metric, flag }),
            _ => Err(SourceError::Malformed(format!(
                "incomplete metadata for {}",
                self.display_name.as_deref().unwrap_or("?")
            ))),
        }
    }
}

/// Community kind tag in listing responses
const COMMUNITY_KIND: &str = "t5";

/// Listing and metadata access over the public site
pub struct RedditSource {
    fetcher: Arc<Fetcher>,
    base: Url,
    cursor: Regex,
}

impl RedditSource {
    pub fn new(fetcher: Arc<Fetcher>, base_url: &str) -> Result<Self, crate::RedlistError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            fetcher,
            base,
            cursor: Regex::new(r#"(?:\bafter=|"after":\s*")(t3_[A-Za-z0-9]+)"#)?,
        })
    }

    /// `/r/{name}/new/`, optionally continuing from a cursor
    pub fn listing_url(&self, target: &FrontierTarget) -> Result<Url, url::ParseError> {
        let mut url = self.base.join(&format!("r/{}/new/", target.name))?;
        if let Some(cursor) = &target.cursor {
            url.query_pairs_mut().append_pair("after", cursor);
        }
        Ok(url)
    }

    /// `/r/{name}/about.json`
    pub fn about_url(&self, identity: &str) -> Result<Url, url::ParseError> {
        self.base.join(&format!("r/{}/about.json", identity))
    }

    /// `/api/info.json?sr_name=a,b,c`
    pub fn info_url(&self, identities: &[String]) -> Result<Url, url::ParseError> {
        let mut url = self.base.join("api/info.json")?;
        url.query_pairs_mut()
            .append_pair("sr_name", &identities.join(","));
        Ok(url)
    }

    fn next_cursor(&self, payload: &str) -> Option<String> {
        self.cursor
            .captures(payload)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

fn malformed(e: impl std::fmt::Display) -> SourceError {
    SourceError::Malformed(e.to_string())
}

#[async_trait]
impl ListingSource for RedditSource {
    async fn list(&self, target: &FrontierTarget) -> Result<Listing, SourceError> {
        let url = self.listing_url(target).map_err(malformed)?;
        let payload = self.fetcher.fetch(&url).await?;
        let next_cursor = self.next_cursor(&payload);
        Ok(Listing {
            payload,
            next_cursor,
        })
    }
}

#[async_trait]
impl DescribeSource for RedditSource {
    async fn describe(&self, identity: &str) -> Result<Option<Description>, SourceError> {
        let url = self.about_url(identity).map_err(malformed)?;
        let body = match self.fetcher.fetch(&url).await {
            Ok(body) => body,
            // Banned, private, or never existed
            Err(FetchFailure::Client { status: 403 | 404 }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let thing: Thing<About> = serde_json::from_str(&body).map_err(malformed)?;
        if thing.kind != COMMUNITY_KIND {
            // Unknown names come back as a search listing
            return Ok(None);
        }
        thing.data.description().map(Some)
    }

    async fn describe_many(
        &self,
        identities: &[String],
    ) -> Result<HashMap<String, Description>, SourceError> {
        if identities.is_empty() {
            return Ok(HashMap::new());
        }

        let url = self.info_url(identities).map_err(malformed)?;
        let body = self.fetcher.fetch(&url).await?;
        let listing: Thing<ThingListing<About>> =
            serde_json::from_str(&body).map_err(malformed)?;

        let mut found = HashMap::new();
        for child in listing.data.children {
            if child.kind != COMMUNITY_KIND {
                continue;
            }
            let Some(identity) = child.data.display_name.as_deref().and_then(normalize_identity)
            else {
                continue;
            };
            // One incomplete child fails the batch so each item is retried alone
            found.insert(identity, child.data.description()?);
        }
        Ok(found)
    }
}
