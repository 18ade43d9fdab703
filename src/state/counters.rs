use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Process-local crawl counters
///
/// Shared by `Arc` between the orchestrator, the fetcher, and the reporter.
/// Reset at the start of every pass and never persisted.
#[derive(Debug)]
pub struct Counters {
    seen: AtomicUsize,
    discovered: AtomicU64,
    rate_limited: AtomicU64,
    appended: AtomicU64,
    errors: Mutex<BTreeMap<String, u64>>,
    last_flush: Mutex<Option<DateTime<Utc>>>,
    current_target: Mutex<String>,
    pass_started: Mutex<Instant>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone)]
pub struct CounterSnapshot {
    /// Identities currently in the seen set
    pub seen: usize,
    /// Fresh candidates found this pass
    pub discovered: u64,
    /// Rate-limited responses this pass
    pub rate_limited: u64,
    /// Records appended this pass
    pub appended: u64,
    /// Failures by label (HTTP status or error kind)
    pub errors: BTreeMap<String, u64>,
    /// Most recent durability point
    pub last_flush: Option<DateTime<Utc>>,
    /// Listing being fetched
    pub current_target: String,
    /// Time since the pass started
    pub elapsed: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Counters stay usable even if a panicking thread held the lock
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Counters {
    /// Creates zeroed counters with the pass clock starting now
    pub fn new() -> Self {
        Self {
            seen: AtomicUsize::new(0),
            discovered: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            appended: AtomicU64::new(0),
            errors: Mutex::new(BTreeMap::new()),
            last_flush: Mutex::new(None),
            current_target: Mutex::new(String::new()),
            pass_started: Mutex::new(Instant::now()),
        }
    }

    /// Zeroes everything and restarts the pass clock
    pub fn reset(&self) {
        self.seen.store(0, Ordering::SeqCst);
        self.discovered.store(0, Ordering::SeqCst);
        self.rate_limited.store(0, Ordering::SeqCst);
        self.appended.store(0, Ordering::SeqCst);
        lock(&self.errors).clear();
        *lock(&self.last_flush) = None;
        lock(&self.current_target).clear();
        *lock(&self.pass_started) = Instant::now();
    }

    /// Records one failure under the given label
    pub fn record_error(&self, label: &str) {
        self.record_errors(label, 1);
    }

    pub fn record_errors(&self, label: &str, count: u64) {
        if count > 0 {
            *lock(&self.errors).entry(label.to_string()).or_insert(0) += count;
        }
    }

    /// Records a rate-limited response and returns the pass total
    pub fn record_rate_limited(&self) -> u64 {
        self.rate_limited.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Rate-limited responses this pass
    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::SeqCst)
    }

    pub fn set_seen(&self, seen: usize) {
        self.seen.store(seen, Ordering::SeqCst);
    }

    pub fn record_discovered(&self, count: u64) {
        self.discovered.fetch_add(count, Ordering::SeqCst);
    }

    pub fn record_appended(&self) {
        self.appended.fetch_add(1, Ordering::SeqCst);
    }

    /// Records appended this pass
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::SeqCst)
    }

    pub fn set_last_flush(&self, at: Option<DateTime<Utc>>) {
        *lock(&self.last_flush) = at;
    }

    pub fn set_current_target(&self, target: &str) {
        let mut current = lock(&self.current_target);
        current.clear();
        current.push_str(target);
    }

    /// Copies all counters
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            seen: self.seen.load(Ordering::SeqCst),
            discovered: self.discovered.load(Ordering::SeqCst),
            rate_limited: self.rate_limited.load(Ordering::SeqCst),
            appended: self.appended.load(Ordering::SeqCst),
            errors: lock(&self.errors).clone(),
            last_flush: *lock(&self.last_flush),
            current_target: lock(&self.current_target).clone(),
            elapsed: lock(&self.pass_started).elapsed(),
        }
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}
