//! Redlist: a polite community-listing crawler
//!
//! This crate discovers communities from a rate-limited public listing site,
//! deduplicates them against an append-only NDJSON record log, and enriches each
//! new community with subscriber counts and an adult-content flag fetched from
//! the site's authoritative metadata endpoints.

pub mod config;
pub mod crawler;
pub mod identity;
pub mod output;
pub mod state;
pub mod store;

use thiserror::Error;

/// Main error type for Redlist operations
#[derive(Debug, Error)]
pub enum RedlistError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The durability point could not be reached; the run must stop
    #[error("Storage failure: {0}")]
    Storage(#[from] store::StoreError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RedlistError {
    /// Whether this error means persisted state can no longer be trusted
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Coarse error taxonomy used for classification and the progress histogram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// Upstream answered 429
    RateLimited,
    /// Upstream answered 5xx
    ServerError,
    /// Non-retryable request error (4xx other than 429)
    ClientError,
    /// Network-level failure or timeout
    Transient,
    /// Unparseable payload or store line
    Malformed,
    /// Durability point could not be reached
    StorageFailure,
}

impl ErrorKind {
    /// Short label used when no HTTP status is available
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Transient => "transient",
            Self::Malformed => "malformed",
            Self::StorageFailure => "storage_failure",
        }
    }
}

/// Result type alias for Redlist operations
pub type Result<T> = std::result::Result<T, RedlistError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use identity::normalize_identity;
pub use store::{NdjsonStore, Record, SeenSet};
