use crate::config::types::{
    BackoffConfig, Config, CrawlerConfig, FetcherConfig, FrontierConfig, OutputConfig,
    ReporterConfig, UpstreamConfig, UserAgentConfig, VerifierConfig,
};
use crate::identity::normalize_identity;
use crate::ConfigError;
use url::Url;

/// Hard ceiling on identities per batched lookup accepted by the upstream
pub const MAX_VERIFY_BATCH: usize = 100;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_backoff_config(&config.backoff)?;
    validate_verifier_config(&config.verifier)?;
    validate_frontier_config(&config.frontier)?;
    validate_upstream_config(&config.upstream)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_reporter_config(&config.reporter)?;
    Ok(())
}

/// Validates crawl loop configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.target_count < 1 {
        return Err(ConfigError::Validation(
            "target_count must be >= 1".to_string(),
        ));
    }

    if config.rate_limit_threshold < 1 {
        return Err(ConfigError::Validation(
            "rate_limit_threshold must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.request_timeout < 100 {
        return Err(ConfigError::Validation(format!(
            "request_timeout must be >= 100ms, got {}ms",
            config.request_timeout
        )));
    }

    Ok(())
}

fn validate_backoff_config(config: &BackoffConfig) -> Result<(), ConfigError> {
    if config.base < 1 {
        return Err(ConfigError::Validation(
            "backoff base must be >= 1ms".to_string(),
        ));
    }

    if config.max_backoff < config.base {
        return Err(ConfigError::Validation(format!(
            "max_backoff ({}ms) must be >= base ({}ms)",
            config.max_backoff, config.base
        )));
    }

    if config.transient_cap > config.max_backoff {
        return Err(ConfigError::Validation(format!(
            "transient_cap ({}ms) must be <= max_backoff ({}ms)",
            config.transient_cap, config.max_backoff
        )));
    }

    Ok(())
}

fn validate_verifier_config(config: &VerifierConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 || config.batch_size > MAX_VERIFY_BATCH {
        return Err(ConfigError::Validation(format!(
            "verifier batch_size must be between 1 and {}, got {}",
            MAX_VERIFY_BATCH, config.batch_size
        )));
    }

    if config.max_workers < 1 || config.max_workers > 64 {
        return Err(ConfigError::Validation(format!(
            "max_workers must be between 1 and 64, got {}",
            config.max_workers
        )));
    }

    Ok(())
}

/// Validates frontier targets and cadence
fn validate_frontier_config(config: &FrontierConfig) -> Result<(), ConfigError> {
    if config.priority_targets.is_empty() {
        return Err(ConfigError::Validation(
            "priority_targets must contain at least one listing".to_string(),
        ));
    }

    for target in &config.priority_targets {
        if normalize_identity(target).is_none() {
            return Err(ConfigError::Validation(format!(
                "Priority target '{}' is not a valid listing name",
                target
            )));
        }
    }

    if normalize_identity(&config.firehose_target).is_none() {
        return Err(ConfigError::Validation(format!(
            "Firehose target '{}' is not a valid listing name",
            config.firehose_target
        )));
    }

    // Every fetch would be the firehose
    if config.firehose_every == 1 {
        return Err(ConfigError::Validation(
            "firehose_every must be 0 (disabled) or >= 2".to_string(),
        ));
    }

    if config.rederive_every < 1 {
        return Err(ConfigError::Validation(
            "rederive_every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_upstream_config(config: &UpstreamConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.output_path.is_empty() {
        return Err(ConfigError::Validation(
            "output_path cannot be empty".to_string(),
        ));
    }

    if config.flush_batch_size < 1 {
        return Err(ConfigError::Validation(
            "flush_batch_size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_reporter_config(config: &ReporterConfig) -> Result<(), ConfigError> {
    if config.interval < 100 {
        return Err(ConfigError::Validation(format!(
            "reporter interval must be >= 100ms, got {}ms",
            config.interval
        )));
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
