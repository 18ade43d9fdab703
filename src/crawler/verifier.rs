//! Candidate verification
//!
//! Resolves fresh candidates into records through a [`DescribeSource`].
//! Lookups fan out over a bounded worker pool; every request still passes
//! through the fetcher's shared rate gate.
//!
//! # Outcomes
//!
//! | Lookup result | Bucket |
//! |---------------|--------|
//! | Described | `resolved` |
//! | Upstream says it doesn't exist | `missing` |
//! | Request failed, timed out, or was cancelled | `absent` |
//!
//! A failed batched lookup falls back to one lookup per identity, unless the
//! failure means the pass is stopping (throttled or cancelled).

use crate::config::{VerifierConfig, VerifyMode};
use crate::crawler::source::{Description, DescribeSource, SourceError};
use crate::state::Counters;
use crate::store::Record;
use crate::ErrorKind;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Partition of a candidate set after verification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    /// Confirmed records keyed by identity
    pub resolved: BTreeMap<String, Record>,
    /// Lookups that failed; retried when seen again
    pub absent: BTreeSet<String>,
    /// Identities the upstream does not recognize
    pub missing: BTreeSet<String>,
}

impl Verification {
    fn merge(&mut self, identity: String, lookup: Lookup) {
        match lookup {
            Lookup::Found(d) => {
                let record = Record::new(identity.clone(), d.metric, d.flag);
                self.resolved.insert(identity, record);
            }
            Lookup::Missing => {
                self.missing.insert(identity);
            }
            Lookup::Failed => {
                self.absent.insert(identity);
            }
        }
    }
}

enum Lookup {
    Found(Description),
    Missing,
    Failed,
}

/// Bounded-concurrency verifier
pub struct Verifier {
    source: Arc<dyn DescribeSource>,
    mode: VerifyMode,
    batch_size: usize,
    workers: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl Verifier {
    pub fn new(
        source: Arc<dyn DescribeSource>,
        config: &VerifierConfig,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            source,
            mode: config.mode,
            batch_size: config.batch_size.max(1),
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            counters,
        }
    }

    /// Verifies every candidate
    ///
    /// Each candidate lands in exactly one bucket of the result. Never fails;
    /// lookups that could not complete are reported as absent.
    pub async fn verify(&self, candidates: &BTreeSet<String>) -> Verification {
        let mut tasks = JoinSet::new();
        let chunk = match self.mode {
            VerifyMode::PerItem => 1,
            VerifyMode::Batched => self.batch_size,
        };

        let all: Vec<String> = candidates.iter().cloned().collect();
        for group in all.chunks(chunk) {
            let group = group.to_vec();
            let source = self.source.clone();
            let workers = self.workers.clone();
            let counters = self.counters.clone();
            let mode = self.mode;

            tasks.spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return failed(group);
                };
                match mode {
                    VerifyMode::PerItem => lookup_each(source.as_ref(), group, &counters).await,
                    VerifyMode::Batched => lookup_batch(source.as_ref(), group, &counters).await,
                }
            });
        }

        let mut verification = Verification::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcomes) => {
                    for (identity, lookup) in outcomes {
                        verification.merge(identity, lookup);
                    }
                }
                Err(e) => tracing::error!("Verification worker failed: {}", e),
            }
        }

        // Anything a crashed worker held is retried later
        for identity in candidates {
            if !verification.resolved.contains_key(identity)
                && !verification.missing.contains(identity)
            {
                verification.absent.insert(identity.clone());
            }
        }

        tracing::debug!(
            "Verified {} candidates: {} resolved, {} missing, {} absent",
            candidates.len(),
            verification.resolved.len(),
            verification.missing.len(),
            verification.absent.len()
        );

        verification
    }
}

fn failed(group: Vec<String>) -> Vec<(String, Lookup)> {
    group.into_iter().map(|id| (id, Lookup::Failed)).collect()
}

fn note_failure(counters: &Counters, error: &SourceError) {
    // Fetch failures are already counted by the fetcher
    if let SourceError::Malformed(reason) = error {
        counters.record_error(ErrorKind::Malformed.label());
        tracing::debug!("Malformed lookup response: {}", reason);
    }
}

async fn lookup_each(
    source: &dyn DescribeSource,
    group: Vec<String>,
    counters: &Counters,
) -> Vec<(String, Lookup)> {
    let mut outcomes = Vec::with_capacity(group.len());
    let mut stopping = false;

    for identity in group {
        if stopping {
            outcomes.push((identity, Lookup::Failed));
            continue;
        }
        let lookup = match source.describe(&identity).await {
            Ok(Some(description)) => Lookup::Found(description),
            Ok(None) => Lookup::Missing,
            Err(e) => {
                note_failure(counters, &e);
                stopping = e.is_terminal();
                tracing::debug!("Lookup of {} failed: {}", identity, e);
                Lookup::Failed
            }
        };
        outcomes.push((identity, lookup));
    }

    outcomes
}

async fn lookup_batch(
    source: &dyn DescribeSource,
    group: Vec<String>,
    counters: &Counters,
) -> Vec<(String, Lookup)> {
    match source.describe_many(&group).await {
        Ok(mut found) => group
            .into_iter()
            .map(|identity| {
                let lookup = match found.remove(&identity) {
                    Some(description) => Lookup::Found(description),
                    None => Lookup::Missing,
                };
                (identity, lookup)
            })
            .collect(),
        Err(e) if e.is_terminal() => failed(group),
        Err(e) => {
            note_failure(counters, &e);
            tracing::info!(
                "Batched lookup of {} identities failed ({}), falling back to single lookups",
                group.len(),
                e
            );
            lookup_each(source, group, counters).await
        }
    }
}
