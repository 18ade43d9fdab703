//! Crawler module for listing discovery and verification
//!
//! This module contains the core crawling logic, including:
//! - Rate-gated HTTP fetching with backoff
//! - Upstream listing and metadata access
//! - Candidate extraction from listing payloads
//! - Frontier scheduling
//! - Bounded-concurrency verification
//! - Overall crawl orchestration

pub mod backoff;
mod extractor;
mod fetcher;
mod frontier;
mod orchestrator;
mod source;
mod verifier;

pub use backoff::BackoffPolicy;
pub use extractor::{build_extractor, Extractor, LinkExtractor, PatternExtractor};
pub use fetcher::{build_http_client, FetchFailure, FetchPolicy, Fetcher};
pub use frontier::{Frontier, FrontierTarget, TargetKind};
pub use orchestrator::{Orchestrator, PassOutcome, PassReport, RunSummary};
pub use source::{DescribeSource, Description, Listing, ListingSource, RedditSource, SourceError};
pub use verifier::{Verification, Verifier};

use crate::config::Config;
use crate::output::Reporter;
use crate::state::Counters;
use crate::store::NdjsonStore;
use crate::RedlistError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs a complete crawl against the configured upstream
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the store
/// 2. Build the HTTP client and the shared fetcher
/// 3. Start the progress reporter
/// 4. Run passes until the target is reached or `cancel` fires
///
/// # Returns
///
/// * `Ok(RunSummary)` - Crawl finished or was cancelled cleanly
/// * `Err(RedlistError)` - Setup failed or the store could not be written
pub async fn crawl(config: Config, cancel: CancellationToken) -> Result<RunSummary, RedlistError> {
    let counters = Arc::new(Counters::new());
    let store = Arc::new(NdjsonStore::open(
        &config.output.output_path,
        config.output.durability(),
    )?);

    let client = build_http_client(&config.user_agent, &config.fetcher)?;
    let fetcher = Arc::new(Fetcher::new(
        client,
        FetchPolicy::from_config(&config),
        counters.clone(),
        cancel.clone(),
    ));
    let source = Arc::new(RedditSource::new(fetcher.clone(), &config.upstream.base_url)?);

    let reporter_stop = cancel.child_token();
    let reporter = Reporter::new(
        counters.clone(),
        config.crawler.target_count,
        Duration::from_millis(config.reporter.interval),
    )
    .spawn(reporter_stop.clone());

    let orchestrator = Orchestrator::new(
        config,
        store,
        source.clone(),
        source,
        counters,
        cancel,
    )?
    .with_fetcher(fetcher);

    let result = orchestrator.run().await;

    reporter_stop.cancel();
    if let Err(e) = reporter.await {
        tracing::debug!("Reporter task ended abnormally: {}", e);
    }

    result
}
