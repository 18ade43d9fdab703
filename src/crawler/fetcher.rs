//! HTTP fetcher implementation
//!
//! Every request in the process goes through one [`Fetcher`]. It handles:
//! - Building the HTTP client with the identifying user agent
//! - The shared rate gate (minimum gap plus jitter between requests)
//! - Failure classification (rate limited, server, client, transient)
//! - Exponential backoff with a fetcher-wide failure streak
//! - Honoring `Retry-After` hints
//! - Stopping early once the pass rate-limit threshold is reached

use crate::config::{Config, FetcherConfig, UserAgentConfig};
use crate::crawler::backoff::BackoffPolicy;
use crate::state::{pause, Counters, RateGate};
use crate::ErrorKind;
use reqwest::header::RETRY_AFTER;
use reqwest::{redirect::Policy, Client, Response, StatusCode};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Why a fetch produced no payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// Non-retryable 4xx response (other than 429)
    #[error("client error: HTTP {status}")]
    Client { status: u16 },

    /// Retryable failures persisted past the attempt budget
    #[error("gave up after repeated {} failures", .kind.label())]
    GaveUp { kind: ErrorKind },

    /// The pass rate-limit threshold was reached
    #[error("rate-limit threshold reached")]
    Throttled,

    /// Cancellation was requested
    #[error("cancelled")]
    Cancelled,
}

/// Request pacing and retry bounds
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub min_interval: Duration,
    pub jitter: Duration,
    pub max_attempts: u32,
    pub rate_limit_threshold: u64,
    pub backoff: BackoffPolicy,
}

impl FetchPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_interval: Duration::from_millis(config.fetcher.min_interval),
            jitter: Duration::from_millis(config.fetcher.jitter),
            max_attempts: config.fetcher.max_attempts.max(1),
            rate_limit_threshold: config.crawler.rate_limit_threshold,
            backoff: BackoffPolicy::from_config(&config.backoff),
        }
    }
}

/// Outcome of a single HTTP attempt
enum Attempt {
    Body(String),
    Client(u16),
    Retryable {
        kind: ErrorKind,
        label: String,
        hint: Option<Duration>,
    },
}

/// Builds an HTTP client with proper configuration
///
/// The user agent has the form `CrawlerName/Version (+ContactURL; ContactEmail)`.
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    fetcher: &FetcherConfig,
) -> Result<Client, reqwest::Error> {
    let user_agent = format!(
        "{}/{} (+{}; {})",
        user_agent.crawler_name,
        user_agent.crawler_version,
        user_agent.contact_url,
        user_agent.contact_email
    );
    let timeout = Duration::from_millis(fetcher.request_timeout);

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(5))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Rate-gated, retrying HTTP fetcher
pub struct Fetcher {
    client: Client,
    gate: RateGate,
    policy: FetchPolicy,
    /// Consecutive failures across all callers; reset on any success
    streak: AtomicU32,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(
        client: Client,
        policy: FetchPolicy,
        counters: Arc<Counters>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            gate: RateGate::new(policy.min_interval, policy.jitter),
            policy,
            streak: AtomicU32::new(0),
            counters,
            cancel,
        }
    }

    /// Fetches `url` and returns the response body
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx | Return body, reset streak |
    /// | 429 | Count toward threshold, back off exponentially (or per `Retry-After`) |
    /// | 5xx | Fixed server cool-down (or per `Retry-After`) |
    /// | Timeout / connection error | Back off exponentially with the transient cap |
    /// | Other 4xx | Return `Client` immediately |
    ///
    /// Returns `Throttled` without sending anything once the pass has seen
    /// `rate_limit_threshold` rate-limited responses.
    pub async fn fetch(&self, url: &Url) -> Result<String, FetchFailure> {
        let mut attempts = 0u32;

        loop {
            if self.counters.rate_limited() >= self.policy.rate_limit_threshold {
                return Err(FetchFailure::Throttled);
            }
            if !self.gate.acquire(&self.cancel).await {
                return Err(FetchFailure::Cancelled);
            }
            attempts += 1;

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(FetchFailure::Cancelled),
                outcome = self.attempt(url) => outcome,
            };

            let (kind, hint) = match outcome {
                Attempt::Body(body) => {
                    let streak = self.streak.swap(0, Ordering::SeqCst);
                    if streak > 0 {
                        tracing::debug!("Recovered after {} consecutive failures", streak);
                    }
                    return Ok(body);
                }
                Attempt::Client(status) => {
                    self.counters.record_error(&status.to_string());
                    tracing::debug!("{} answered HTTP {}", url, status);
                    return Err(FetchFailure::Client { status });
                }
                Attempt::Retryable { kind, label, hint } => {
                    self.counters.record_error(&label);
                    (kind, hint)
                }
            };

            if kind == ErrorKind::RateLimited {
                let total = self.counters.record_rate_limited();
                if total >= self.policy.rate_limit_threshold {
                    tracing::warn!(
                        "Rate limited {} times this pass, abandoning {}",
                        total,
                        url
                    );
                    return Err(FetchFailure::Throttled);
                }
            }

            if attempts >= self.policy.max_attempts {
                tracing::warn!(
                    "Giving up on {} after {} attempts ({})",
                    url,
                    attempts,
                    kind.label()
                );
                return Err(FetchFailure::GaveUp { kind });
            }

            let streak = self.streak.fetch_add(1, Ordering::SeqCst);
            let delay = match hint {
                Some(hint) => self.policy.backoff.honor_hint(hint),
                None => self.policy.backoff.delay(kind, streak),
            };
            tracing::info!(
                "{} on {}, retrying in {:.1}s (attempt {}/{})",
                kind.label(),
                url,
                delay.as_secs_f64(),
                attempts,
                self.policy.max_attempts
            );

            if !pause(delay, &self.cancel).await {
                return Err(FetchFailure::Cancelled);
            }
        }
    }

    /// Clears the failure streak and the rate gate reservation
    pub async fn reset(&self) {
        self.streak.store(0, Ordering::SeqCst);
        self.gate.reset().await;
    }

    #[cfg(test)]
    fn streak(&self) -> u32 {
        self.streak.load(Ordering::SeqCst)
    }

    async fn attempt(&self, url: &Url) -> Attempt {
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                let label = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connect"
                } else {
                    ErrorKind::Transient.label()
                };
                tracing::debug!("Request to {} failed: {}", url, e);
                return Attempt::Retryable {
                    kind: ErrorKind::Transient,
                    label: label.to_string(),
                    hint: None,
                };
            }
        };

        let status = response.status();
        if status.is_success() {
            return match response.text().await {
                Ok(body) => Attempt::Body(body),
                Err(e) => {
                    tracing::debug!("Reading body of {} failed: {}", url, e);
                    Attempt::Retryable {
                        kind: ErrorKind::Transient,
                        label: ErrorKind::Transient.label().to_string(),
                        hint: None,
                    }
                }
            };
        }

        let kind = if status == StatusCode::TOO_MANY_REQUESTS {
            ErrorKind::RateLimited
        } else if status.is_server_error() {
            ErrorKind::ServerError
        } else {
            return Attempt::Client(status.as_u16());
        };

        Attempt::Retryable {
            kind,
            label: status.as_u16().to_string(),
            hint: retry_after(&response),
        }
    }
}

/// Parses a `Retry-After` header given in whole seconds
///
/// Anything else (HTTP dates, fractions, out-of-range numbers) is ignored and
/// the computed backoff applies.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
