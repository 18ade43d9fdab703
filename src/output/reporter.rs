//! Periodic progress reporting
//!
//! A background task that logs a [`ProgressSnapshot`] every interval. It only
//! reads the shared counters and never touches the store.

use crate::state::{CounterSnapshot, Counters};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const BAR_WIDTH: usize = 30;

/// Counters plus the pass target, ready for display
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub counters: CounterSnapshot,
    pub target: usize,
}

impl ProgressSnapshot {
    pub fn new(counters: CounterSnapshot, target: usize) -> Self {
        Self { counters, target }
    }

    /// Fraction of the target reached, in `[0, 1]`
    pub fn fraction(&self) -> f64 {
        if self.target == 0 {
            return 1.0;
        }
        (self.counters.seen as f64 / self.target as f64).min(1.0)
    }

    /// Time left at the current append rate
    ///
    /// `elapsed / appended * remaining`; unknown until something is appended.
    pub fn eta(&self) -> Option<Duration> {
        let remaining = self.target.saturating_sub(self.counters.seen);
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        if self.counters.appended == 0 {
            return None;
        }
        let per_record = self.counters.elapsed.as_secs_f64() / self.counters.appended as f64;
        Some(Duration::from_secs_f64(per_record * remaining as f64))
    }

    /// One-line rendering
    ///
    /// `Total=812 429s=2 Errors=429:2,503:1 Appended=40 Page=pics [#####.....] 8.1% ETA 00:12:31`
    pub fn render(&self) -> String {
        let c = &self.counters;
        let errors = if c.errors.is_empty() {
            "-".to_string()
        } else {
            c.errors
                .iter()
                .map(|(label, count)| format!("{}:{}", label, count))
                .collect::<Vec<_>>()
                .join(",")
        };
        let filled = (self.fraction() * BAR_WIDTH as f64).round() as usize;
        let eta = self
            .eta()
            .map(format_duration)
            .unwrap_or_else(|| "--:--:--".to_string());

        format!(
            "Total={} 429s={} Errors={} Appended={} Page={} [{}{}] {:.1}% ETA {}",
            c.seen,
            c.rate_limited,
            errors,
            c.appended,
            if c.current_target.is_empty() {
                "-"
            } else {
                c.current_target.as_str()
            },
            "#".repeat(filled),
            ".".repeat(BAR_WIDTH - filled),
            self.fraction() * 100.0,
            eta
        )
    }
}

/// Formats a duration as `HH:MM:SS`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Background progress logger
pub struct Reporter {
    counters: Arc<Counters>,
    target: usize,
    interval: Duration,
}

impl Reporter {
    pub fn new(counters: Arc<Counters>, target: usize, interval: Duration) -> Self {
        Self {
            counters,
            target,
            interval,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::new(self.counters.snapshot(), self.target)
    }

    /// Starts logging until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        tracing::info!("{}", self.snapshot().render());
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot(seen: usize, appended: u64, elapsed_secs: u64, target: usize) -> ProgressSnapshot {
        ProgressSnapshot::new(
            CounterSnapshot {
                seen,
                discovered: appended,
                rate_limited: 0,
                appended,
                errors: BTreeMap::new(),
                last_flush: None,
                current_target: String::new(),
                elapsed: Duration::from_secs(elapsed_secs),
            },
            target,
        )
    }

    #[test]
    fn test_eta_linear_extrapolation() {
        // 10 appended in 100s, 50 to go
        let snap = snapshot(50, 10, 100, 100);
        assert_eq!(snap.eta(), Some(Duration::from_secs(500)));
    }

    #[test]
    fn test_eta_unknown_before_first_append() {
        assert_eq!(snapshot(50, 0, 100, 100).eta(), None);
    }

    #[test]
    fn test_eta_zero_at_target() {
        assert_eq!(snapshot(120, 0, 5, 100).eta(), Some(Duration::ZERO));
        assert_eq!(snapshot(120, 0, 5, 100).fraction(), 1.0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }

    #[test]
    fn test_render_fields() {
        let mut snap = snapshot(25, 5, 10, 100);
        snap.counters.rate_limited = 2;
        snap.counters.errors.insert("429".to_string(), 2);
        snap.counters.errors.insert("503".to_string(), 1);
        snap.counters.current_target = "pics".to_string();

        let line = snap.render();
        assert!(line.starts_with("Total=25 429s=2 Errors=429:2,503:1 Appended=5 Page=pics ["));
        assert!(line.contains("25.0%"));
        // 2s per record, 75 to go
        assert!(line.ends_with("ETA 00:02:30"));
    }

    #[tokio::test]
    async fn test_reporter_stops_on_cancel() {
        let reporter = Reporter::new(Arc::new(Counters::new()), 10, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let handle = reporter.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
