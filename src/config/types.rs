use crate::store::DurabilityPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Redlist
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub reporter: ReporterConfig,
}

/// Crawl loop behavior
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of known communities at which a pass stops
    #[serde(rename = "target-count")]
    pub target_count: usize,

    /// Rate-limited responses within one pass that trigger a full restart
    #[serde(rename = "rate-limit-threshold", default = "default_rate_limit_threshold")]
    pub rate_limit_threshold: u64,

    /// Keep running passes until cancelled
    #[serde(rename = "continuous-mode", default)]
    pub continuous_mode: bool,

    /// Pause between passes in continuous mode (milliseconds)
    #[serde(rename = "cooldown-interval", default = "default_cooldown_interval")]
    pub cooldown_interval: u64,

    /// Pause before restarting after sustained rate limiting (milliseconds)
    #[serde(rename = "restart-delay", default = "default_restart_delay")]
    pub restart_delay: u64,

    /// Pause between crawl rounds (milliseconds)
    #[serde(rename = "round-delay", default = "default_round_delay")]
    pub round_delay: u64,
}

/// Shared request gate and retry bounds
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Minimum gap between any two requests (milliseconds)
    #[serde(rename = "min-interval", default = "default_min_interval")]
    pub min_interval: u64,

    /// Uniform random extra gap added to each request (milliseconds)
    #[serde(default = "default_fetch_jitter")]
    pub jitter: u64,

    /// Per-request timeout (milliseconds)
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Attempts per fetch before giving up on a retryable failure
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Backoff applied after failed requests
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    /// Base delay, doubled per consecutive failure (milliseconds)
    #[serde(default = "default_backoff_base")]
    pub base: u64,

    /// Uniform random extra delay (milliseconds)
    #[serde(default = "default_backoff_jitter")]
    pub jitter: u64,

    /// Cap for rate-limit backoff and retry hints (milliseconds)
    #[serde(rename = "max-backoff", default = "default_max_backoff")]
    pub max_backoff: u64,

    /// Cap for transient network failure backoff (milliseconds)
    #[serde(rename = "transient-cap", default = "default_transient_cap")]
    pub transient_cap: u64,

    /// Fixed cool-down after a server error (milliseconds)
    #[serde(rename = "server-cooldown", default = "default_server_cooldown")]
    pub server_cooldown: u64,
}

/// How candidates are resolved into records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerifyMode {
    /// One lookup per candidate
    PerItem,
    /// One group lookup per `batch-size` candidates
    Batched,
}

/// Verification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierConfig {
    #[serde(default = "default_verify_mode")]
    pub mode: VerifyMode,

    /// Maximum identities per batched lookup
    #[serde(rename = "batch-size", default = "default_verify_batch_size")]
    pub batch_size: usize,

    /// Maximum lookups in flight
    #[serde(rename = "max-workers", default = "default_max_workers")]
    pub max_workers: usize,
}

/// Frontier scheduling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FrontierConfig {
    /// Listings always visited first in every cycle
    #[serde(rename = "priority-targets")]
    pub priority_targets: Vec<String>,

    /// Global listing substituted periodically
    #[serde(rename = "firehose-target", default = "default_firehose_target")]
    pub firehose_target: String,

    /// Every Nth fetch uses the firehose target (0 disables)
    #[serde(rename = "firehose-every", default = "default_firehose_every")]
    pub firehose_every: u64,

    /// Rebuild derived targets from known communities
    #[serde(rename = "self-extend", default = "default_true")]
    pub self_extend: bool,

    /// Number of full cycles between rebuilds
    #[serde(rename = "rederive-every", default = "default_rederive_every")]
    pub rederive_every: u64,

    /// Page deeper into a listing on each visit
    #[serde(rename = "follow-cursors", default = "default_true")]
    pub follow_cursors: bool,
}

/// Candidate extraction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractStrategy {
    /// Scan raw payload text for community paths
    Pattern,
    /// Parse HTML and read anchor targets
    Links,
}

/// Extraction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_extract_strategy")]
    pub strategy: ExtractStrategy,
}

/// Upstream site configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the listing site
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the NDJSON record log
    #[serde(rename = "output-path")]
    pub output_path: String,

    /// Pending appends that force a durability point
    #[serde(rename = "flush-batch-size", default = "default_flush_batch_size")]
    pub flush_batch_size: usize,

    /// Maximum age of pending appends before a durability point (milliseconds)
    #[serde(rename = "flush-max-delay", default = "default_flush_max_delay")]
    pub flush_max_delay: u64,

    /// Run byte-level repair before the first load
    #[serde(rename = "repair-on-start", default = "default_true")]
    pub repair_on_start: bool,
}

/// Progress reporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReporterConfig {
    /// Time between progress snapshots (milliseconds)
    #[serde(default = "default_report_interval")]
    pub interval: u64,
}

impl CrawlerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_interval)
    }

    pub fn restart_pause(&self) -> Duration {
        Duration::from_millis(self.restart_delay)
    }

    pub fn round_pause(&self) -> Duration {
        Duration::from_millis(self.round_delay)
    }
}

impl OutputConfig {
    pub fn durability(&self) -> DurabilityPolicy {
        DurabilityPolicy {
            batch_size: self.flush_batch_size,
            max_delay: Duration::from_millis(self.flush_max_delay),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            min_interval: default_min_interval(),
            jitter: default_fetch_jitter(),
            request_timeout: default_request_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: default_backoff_base(),
            jitter: default_backoff_jitter(),
            max_backoff: default_max_backoff(),
            transient_cap: default_transient_cap(),
            server_cooldown: default_server_cooldown(),
        }
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            mode: default_verify_mode(),
            batch_size: default_verify_batch_size(),
            max_workers: default_max_workers(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            strategy: default_extract_strategy(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval: default_report_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_rate_limit_threshold() -> u64 {
    10
}

fn default_cooldown_interval() -> u64 {
    120_000
}

fn default_restart_delay() -> u64 {
    30_000
}

fn default_round_delay() -> u64 {
    200
}

fn default_min_interval() -> u64 {
    1_000
}

fn default_fetch_jitter() -> u64 {
    400
}

fn default_request_timeout() -> u64 {
    15_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_jitter() -> u64 {
    1_000
}

fn default_max_backoff() -> u64 {
    600_000
}

fn default_transient_cap() -> u64 {
    60_000
}

fn default_server_cooldown() -> u64 {
    10_000
}

fn default_verify_mode() -> VerifyMode {
    VerifyMode::Batched
}

fn default_verify_batch_size() -> usize {
    50
}

fn default_max_workers() -> usize {
    8
}

fn default_firehose_target() -> String {
    "all".to_string()
}

fn default_firehose_every() -> u64 {
    4
}

fn default_rederive_every() -> u64 {
    1
}

fn default_extract_strategy() -> ExtractStrategy {
    ExtractStrategy::Pattern
}

fn default_base_url() -> String {
    "https://www.reddit.com".to_string()
}

fn default_flush_batch_size() -> usize {
    1_000
}

fn default_flush_max_delay() -> u64 {
    2_000
}

fn default_report_interval() -> u64 {
    2_000
}
