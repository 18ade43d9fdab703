//! Configuration module for Redlist
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use redlist::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("redlist.toml")).unwrap();
//! println!("Crawler will stop at {} communities", config.crawler.target_count);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BackoffConfig, Config, CrawlerConfig, ExtractStrategy, ExtractorConfig, FetcherConfig,
    FrontierConfig, OutputConfig, ReporterConfig, UpstreamConfig, UserAgentConfig,
    VerifierConfig, VerifyMode,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
