//! Crawl orchestration
//!
//! This module contains the main crawl loop that ties together:
//! - Loading the store and rebuilding the seen set
//! - Picking listings from the frontier
//! - Extracting, deduplicating, and verifying candidates
//! - Appending confirmed records
//! - Restarting after sustained rate limiting
//! - Continuous mode and cancellation
//!
//! A *pass* runs from a store load to a terminal condition. A *round* is one
//! listing fetch and everything derived from it. Rounds always complete before
//! the terminal conditions are re-checked.

use crate::config::Config;
use crate::crawler::extractor::{build_extractor, Extractor};
use crate::crawler::fetcher::{FetchFailure, Fetcher};
use crate::crawler::frontier::{Frontier, FrontierTarget};
use crate::crawler::source::{DescribeSource, ListingSource, SourceError};
use crate::crawler::verifier::Verifier;
use crate::state::{pause, Counters};
use crate::store::{NdjsonStore, SeenSet};
use crate::RedlistError;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// How a pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The seen set reached the target count
    TargetReached,
    /// A full cycle produced nothing new (continuous mode only)
    Exhausted,
    /// The rate-limit threshold was reached
    Restart,
    /// Cancellation was requested
    Cancelled,
}

/// Result of one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub outcome: PassOutcome,
    /// Records appended during the pass
    pub appended: u64,
    /// Size of the seen set at the end of the pass
    pub seen: usize,
}

/// Result of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passes: u64,
    pub restarts: u64,
    pub appended: u64,
    pub seen: usize,
    pub cancelled: bool,
}

/// How a round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundStatus {
    Completed,
    Skipped,
    Throttled,
    Cancelled,
}

struct RoundReport {
    status: RoundStatus,
    appended: u64,
}

impl RoundReport {
    fn ended(status: RoundStatus) -> Self {
        Self {
            status,
            appended: 0,
        }
    }
}

/// Per-pass working state
struct PassState {
    seen: SeenSet,
    frontier: Frontier,
    /// Identities the upstream does not recognize; not re-verified this pass
    missing: HashSet<String>,
}

/// Main crawl orchestrator
pub struct Orchestrator {
    config: Arc<Config>,
    store: Arc<NdjsonStore>,
    listings: Arc<dyn ListingSource>,
    verifier: Verifier,
    extractor: Box<dyn Extractor>,
    fetcher: Option<Arc<Fetcher>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Creates an orchestrator over the given store and upstream seams
    pub fn new(
        config: Config,
        store: Arc<NdjsonStore>,
        listings: Arc<dyn ListingSource>,
        describer: Arc<dyn DescribeSource>,
        counters: Arc<Counters>,
        cancel: CancellationToken,
    ) -> Result<Self, RedlistError> {
        let base_url = Url::parse(&config.upstream.base_url)?;
        let extractor = build_extractor(config.extractor.strategy, &base_url)?;
        let verifier = Verifier::new(describer, &config.verifier, counters.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            listings,
            verifier,
            extractor,
            fetcher: None,
            counters,
            cancel,
        })
    }

    /// Attaches the fetcher whose backoff state is cleared on restart
    pub fn with_fetcher(mut self, fetcher: Arc<Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    /// Runs passes until the target is reached, or until cancelled in
    /// continuous mode
    ///
    /// Only a storage failure ends the run with an error.
    pub async fn run(&self) -> Result<RunSummary, RedlistError> {
        let mut summary = RunSummary::default();
        self.repair_if_configured()?;

        loop {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            summary.passes += 1;
            let report = self.run_pass().await?;
            summary.appended += report.appended;
            summary.seen = report.seen;

            let wait = match report.outcome {
                PassOutcome::Cancelled => {
                    summary.cancelled = true;
                    break;
                }
                PassOutcome::Restart => {
                    summary.restarts += 1;
                    tracing::warn!(
                        "Rate limit threshold reached, restarting in {:.0}s",
                        self.config.crawler.restart_pause().as_secs_f64()
                    );
                    self.config.crawler.restart_pause()
                }
                PassOutcome::TargetReached | PassOutcome::Exhausted => {
                    if !self.config.crawler.continuous_mode {
                        break;
                    }
                    tracing::info!(
                        "Pass {} finished ({:?}) with {} communities, next pass in {:.0}s",
                        summary.passes,
                        report.outcome,
                        report.seen,
                        self.config.crawler.cooldown().as_secs_f64()
                    );
                    self.config.crawler.cooldown()
                }
            };

            if !pause(wait, &self.cancel).await {
                summary.cancelled = true;
                break;
            }

            // Counters and the store are reloaded by the next pass itself
            if report.outcome == PassOutcome::Restart {
                if let Some(fetcher) = &self.fetcher {
                    fetcher.reset().await;
                }
            }
        }

        tracing::info!(
            "Run finished: {} pass(es), {} restart(s), {} appended, {} known",
            summary.passes,
            summary.restarts,
            summary.appended,
            summary.seen
        );
        Ok(summary)
    }

    fn repair_if_configured(&self) -> Result<(), RedlistError> {
        if self.config.output.repair_on_start {
            self.store.repair()?;
        }
        Ok(())
    }

    /// Runs a single pass from a fresh store load
    pub async fn run_pass(&self) -> Result<PassReport, RedlistError> {
        self.counters.reset();

        let loaded = self.store.load()?;
        self.counters
            .record_errors(crate::ErrorKind::Malformed.label(), loaded.malformed as u64);
        self.counters.set_seen(loaded.seen.len());

        let mut state = PassState {
            frontier: Frontier::with_seen(&self.config.frontier, &loaded.seen),
            seen: loaded.seen,
            missing: HashSet::new(),
        };

        let target = self.config.crawler.target_count;
        let threshold = self.config.crawler.rate_limit_threshold;
        let continuous = self.config.crawler.continuous_mode;
        let mut appended = 0u64;
        let mut cycle_appended = 0u64;

        tracing::info!(
            "Starting pass: {} known, target {}, {} listings in frontier",
            state.seen.len(),
            target,
            state.frontier.len()
        );

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break PassOutcome::Cancelled;
            }
            if state.seen.len() >= target {
                break PassOutcome::TargetReached;
            }
            if self.counters.rate_limited() >= threshold {
                break PassOutcome::Restart;
            }

            let next = state.frontier.next_target();
            self.counters.set_current_target(&next.name);

            let round = self.run_round(&next, &mut state).await?;
            appended += round.appended;
            cycle_appended += round.appended;

            self.store.sync_if_due()?;
            self.counters.set_last_flush(self.store.last_durable_at());

            match round.status {
                RoundStatus::Throttled => break PassOutcome::Restart,
                RoundStatus::Cancelled => break PassOutcome::Cancelled,
                RoundStatus::Completed | RoundStatus::Skipped => {}
            }

            if state.frontier.take_cycle_boundary() {
                tracing::debug!(
                    "Cycle {} done, {} appended",
                    state.frontier.cycles(),
                    cycle_appended
                );
                if state.frontier.should_rederive() {
                    state.frontier.rederive(&state.seen);
                }
                if continuous && cycle_appended == 0 {
                    break PassOutcome::Exhausted;
                }
                cycle_appended = 0;
            }

            if state.seen.len() < target
                && !pause(self.config.crawler.round_pause(), &self.cancel).await
            {
                break PassOutcome::Cancelled;
            }
        };

        self.store.flush()?;
        self.counters.set_last_flush(self.store.last_durable_at());

        tracing::info!(
            "Pass ended ({:?}): {} appended, {} known",
            outcome,
            appended,
            state.seen.len()
        );

        Ok(PassReport {
            outcome,
            appended,
            seen: state.seen.len(),
        })
    }

    /// Fetches one listing and appends every newly confirmed community
    async fn run_round(
        &self,
        target: &FrontierTarget,
        state: &mut PassState,
    ) -> Result<RoundReport, RedlistError> {
        let listing = match self.listings.list(target).await {
            Ok(listing) => listing,
            Err(SourceError::Fetch(FetchFailure::Cancelled)) => {
                return Ok(RoundReport::ended(RoundStatus::Cancelled));
            }
            Err(SourceError::Fetch(FetchFailure::Throttled)) => {
                return Ok(RoundReport::ended(RoundStatus::Throttled));
            }
            Err(e) => {
                tracing::warn!("Skipping listing {}: {}", target.name, e);
                return Ok(RoundReport::ended(RoundStatus::Skipped));
            }
        };

        state
            .frontier
            .record_cursor(&target.name, listing.next_cursor.clone());

        let candidates = self.extractor.extract(&listing.payload);
        let fresh: BTreeSet<String> = state
            .seen
            .fresh(&candidates)
            .into_iter()
            .filter(|identity| !state.missing.contains(identity))
            .collect();

        tracing::debug!(
            "{}: {} candidates, {} fresh",
            target.name,
            candidates.len(),
            fresh.len()
        );

        if fresh.is_empty() {
            return Ok(RoundReport::ended(RoundStatus::Completed));
        }
        self.counters.record_discovered(fresh.len() as u64);

        let verification = self.verifier.verify(&fresh).await;
        state.missing.extend(verification.missing);

        let mut appended = 0;
        for record in verification.resolved.into_values() {
            // Durable before it counts as seen
            self.store.append(&record)?;
            tracing::debug!(
                "+ {} ({} subscribers{})",
                record.identity,
                record.metric,
                if record.flag { ", nsfw" } else { "" }
            );
            state.seen.insert(record.identity);
            self.counters.record_appended();
            appended += 1;
        }
        self.counters.set_seen(state.seen.len());

        let status = if self.cancel.is_cancelled() {
            RoundStatus::Cancelled
        } else {
            RoundStatus::Completed
        };
        Ok(RoundReport { status, appended })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::crawler::source::{Description, Listing};
    use crate::store::{DurabilityPolicy, Record};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves scripted payloads per listing name, repeating the last one
    struct ScriptedListings {
        pages: HashMap<String, Vec<String>>,
        calls: Mutex<Vec<FrontierTarget>>,
    }

    impl ScriptedListings {
        fn new(pages: Vec<(&str, Vec<&str>)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(name, bodies)| {
                        (
                            name.to_string(),
                            bodies.iter().map(|b| b.to_string()).collect(),
                        )
                    })
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<FrontierTarget> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ListingSource for ScriptedListings {
        async fn list(&self, target: &FrontierTarget) -> Result<Listing, SourceError> {
            let mut calls = self.calls.lock().unwrap();
            let visit = calls.iter().filter(|t| t.name == target.name).count();
            calls.push(target.clone());

            let payload = self
                .pages
                .get(&target.name)
                .and_then(|bodies| bodies.get(visit.min(bodies.len().saturating_sub(1))))
                .cloned()
                .unwrap_or_default();
            Ok(Listing {
                payload,
                next_cursor: Some(format!("t3_{}{}", target.name, visit)),
            })
        }
    }

    /// Every identity exists except the ones listed as gone
    #[derive(Default)]
    struct Everyone {
        gone: Vec<&'static str>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl DescribeSource for Everyone {
        async fn describe(&self, identity: &str) -> Result<Option<Description>, SourceError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.gone.iter().any(|g| *g == identity) {
                return Ok(None);
            }
            Ok(Some(Description {
                metric: 10_000,
                flag: false,
            }))
        }
    }

    fn config(dir: &TempDir, extra_crawler: &str) -> Config {
        let toml = format!(
            r#"
[crawler]
target-count = 3
round-delay = 0
restart-delay = 0
cooldown-interval = 0
{extra_crawler}

[frontier]
priority-targets = ["aaa", "bbb"]
firehose-every = 0
self-extend = false

[verifier]
mode = "per-item"

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[output]
output-path = "{}"
"#,
            dir.path().join("subs.ndjson").display()
        );
        parse_config(&toml).unwrap()
    }

    fn orchestrator(
        config: Config,
        listings: Arc<ScriptedListings>,
        describer: Arc<Everyone>,
    ) -> (Orchestrator, Arc<NdjsonStore>, CancellationToken) {
        let store = Arc::new(
            NdjsonStore::open(&config.output.output_path, DurabilityPolicy::immediate()).unwrap(),
        );
        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::new(
            config,
            store.clone(),
            listings,
            describer,
            Arc::new(Counters::new()),
            cancel.clone(),
        )
        .unwrap();
        (orchestrator, store, cancel)
    }

    fn names(store: &NdjsonStore) -> Vec<String> {
        let mut names: Vec<String> = store
            .load()
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.identity)
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_pass_reaches_target() {
        let dir = TempDir::new().unwrap();
        let listings = Arc::new(ScriptedListings::new(vec![
            ("aaa", vec!["/r/xxx/ /r/yyy/"]),
            ("bbb", vec!["/r/yyy/ /r/zzz/"]),
        ]));
        let describer = Arc::new(Everyone::default());
        let (orchestrator, store, _) = orchestrator(config(&dir, ""), listings.clone(), describer.clone());

        let report = orchestrator.run_pass().await.unwrap();

        assert_eq!(report.outcome, PassOutcome::TargetReached);
        assert_eq!(report.appended, 3);
        assert_eq!(names(&store), vec!["xxx", "yyy", "zzz"]);
        // yyy is never looked up twice
        assert_eq!(describer.lookups.load(Ordering::SeqCst), 3);
        assert_eq!(listings.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_known_identities_are_not_reverified() {
        let dir = TempDir::new().unwrap();
        let listings = Arc::new(ScriptedListings::new(vec![
            ("aaa", vec!["/r/xxx/ /r/yyy/"]),
            ("bbb", vec!["/r/zzz/"]),
        ]));
        let describer = Arc::new(Everyone::default());
        let cfg = config(&dir, "");
        let (orchestrator, store, _) = orchestrator(cfg, listings, describer.clone());
        store.append(&Record::new("xxx", 5, true)).unwrap();

        let report = orchestrator.run_pass().await.unwrap();

        assert_eq!(report.outcome, PassOutcome::TargetReached);
        assert_eq!(report.appended, 2);
        assert_eq!(describer.lookups.load(Ordering::SeqCst), 2);
        // The existing record is untouched
        let loaded = store.load().unwrap();
        assert!(loaded.records.contains(&Record::new("xxx", 5, true)));
    }

    #[tokio::test]
    async fn test_missing_identities_skipped_for_rest_of_pass() {
        let dir = TempDir::new().unwrap();
        let listings = Arc::new(ScriptedListings::new(vec![
            ("aaa", vec!["/r/ghost/ /r/xxx/", "/r/ghost/ /r/yyy/"]),
            ("bbb", vec!["/r/ghost/", "/r/ghost/ /r/zzz/"]),
        ]));
        let describer = Arc::new(Everyone {
            gone: vec!["ghost"],
            ..Default::default()
        });
        let (orchestrator, store, _) = orchestrator(config(&dir, ""), listings, describer.clone());

        let report = orchestrator.run_pass().await.unwrap();

        assert_eq!(report.outcome, PassOutcome::TargetReached);
        assert_eq!(names(&store), vec!["xxx", "yyy", "zzz"]);
        // ghost once, plus xxx, yyy, zzz
        assert_eq!(describer.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cursors_passed_back_to_listings() {
        let dir = TempDir::new().unwrap();
        let listings = Arc::new(ScriptedListings::new(vec![
            ("aaa", vec!["", "/r/xxx/ /r/yyy/ /r/zzz/"]),
            ("bbb", vec![""]),
        ]));
        let (orchestrator, _, _) =
            orchestrator(config(&dir, ""), listings.clone(), Arc::new(Everyone::default()));

        orchestrator.run_pass().await.unwrap();

        let calls = listings.calls();
        assert_eq!(calls[0].cursor, None);
        assert_eq!(calls[2].name, "aaa");
        assert_eq!(calls[2].cursor, Some("t3_aaa0".to_string()));
    }

    #[tokio::test]
    async fn test_continuous_pass_exhausts_without_new_results() {
        let dir = TempDir::new().unwrap();
        let listings = Arc::new(ScriptedListings::new(vec![("aaa", vec!["/r/xxx/"]), ("bbb", vec![""])]));
        let (orchestrator, store, _) = orchestrator(
            config(&dir, "continuous-mode = true"),
            listings,
            Arc::new(Everyone::default()),
        );

        let report = orchestrator.run_pass().await.unwrap();

        assert_eq!(report.outcome, PassOutcome::Exhausted);
        assert_eq!(names(&store), vec!["xxx"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let listings = Arc::new(ScriptedListings::new(vec![]));
        let (orchestrator, _, cancel) =
            orchestrator(config(&dir, ""), listings.clone(), Arc::new(Everyone::default()));
        cancel.cancel();

        let summary = orchestrator.run().await.unwrap();

        assert!(summary.cancelled);
        assert!(listings.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_at_target_outside_continuous_mode() {
        let dir = TempDir::new().unwrap();
        let listings = Arc::new(ScriptedListings::new(vec![
            ("aaa", vec!["/r/xxx/ /r/yyy/ /r/zzz/"]),
            ("bbb", vec![""]),
        ]));
        let (orchestrator, _, _) =
            orchestrator(config(&dir, ""), listings, Arc::new(Everyone::default()));

        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.passes, 1);
        assert_eq!(summary.appended, 3);
        assert_eq!(summary.seen, 3);
        assert!(!summary.cancelled);
    }
}
