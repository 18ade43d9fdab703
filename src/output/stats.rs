//! Statistics generation from the record log
//!
//! This module provides functionality for summarizing a store file without
//! crawling: totals, flag split, and the metric distribution.

use crate::store::{NdjsonStore, Record};
use crate::RedlistError;

/// Record log summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatistics {
    /// Distinct communities
    pub total: usize,

    /// Communities with the adult-content flag set
    pub flagged: usize,

    /// Communities without the flag
    pub unflagged: usize,

    /// Lines that could not be parsed
    pub malformed: usize,

    /// Sum of all subscriber counts
    pub total_metric: u64,

    /// Median subscriber count
    pub median_metric: u64,

    /// Largest communities by subscriber count, descending
    pub largest: Vec<Record>,
}

/// Loads statistics from the store
///
/// # Arguments
///
/// * `store` - The store to summarize
/// * `top` - How many of the largest communities to include
pub fn load_statistics(store: &NdjsonStore, top: usize) -> Result<StoreStatistics, RedlistError> {
    let report = store.load()?;
    Ok(summarize(report.records, report.malformed, top))
}

fn summarize(mut records: Vec<Record>, malformed: usize, top: usize) -> StoreStatistics {
    let flagged = records.iter().filter(|r| r.flag).count();
    let total_metric = records.iter().map(|r| r.metric).sum();

    // Largest first; ties broken by name for stable output
    records.sort_by(|a, b| b.metric.cmp(&a.metric).then_with(|| a.identity.cmp(&b.identity)));

    let median_metric = match records.len() {
        0 => 0,
        n if n % 2 == 1 => records[n / 2].metric,
        n => (records[n / 2 - 1].metric + records[n / 2].metric) / 2,
    };

    StoreStatistics {
        total: records.len(),
        flagged,
        unflagged: records.len() - flagged,
        malformed,
        total_metric,
        median_metric,
        largest: records.into_iter().take(top).collect(),
    }
}

/// Prints statistics to stdout in a human-readable format
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Store Statistics ===\n");

    println!("Overview:");
    println!("  Communities: {}", stats.total);
    let percentage = if stats.total > 0 {
        (stats.flagged as f64 / stats.total as f64) * 100.0
    } else {
        0.0
    };
    println!("  NSFW: {} ({:.1}%)", stats.flagged, percentage);
    println!("  SFW: {}", stats.unflagged);
    if stats.malformed > 0 {
        println!("  Malformed lines: {}", stats.malformed);
    }
    println!();

    println!("Subscribers:");
    println!("  Total: {}", stats.total_metric);
    println!("  Median: {}", stats.median_metric);
    println!();

    if !stats.largest.is_empty() {
        println!("Largest ({}):", stats.largest.len());
        for record in &stats.largest {
            println!(
                "  - {} ({}{})",
                record.identity,
                record.metric,
                if record.flag { ", nsfw" } else { "" }
            );
        }
        println!();
    }
}
