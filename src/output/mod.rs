//! Output module for progress reporting and store summaries
//!
//! This module handles:
//! - Periodic progress snapshots while crawling
//! - Offline statistics over the record log

mod reporter;
pub mod stats;

pub use reporter::{format_duration, ProgressSnapshot, Reporter};
pub use stats::{load_statistics, print_statistics, StoreStatistics};
