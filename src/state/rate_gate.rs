use crate::state::pause_until;
use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shared minimum gap between requests
///
/// Every caller reserves the next free slot under the lock, then sleeps until
/// that slot outside of it. Concurrent callers (the crawl loop and verifier
/// workers) therefore queue behind one clock and never burst.
#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    jitter: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateGate {
    /// Creates a gate with the given gap and uniform jitter
    pub fn new(min_interval: Duration, jitter: Duration) -> Self {
        Self {
            min_interval,
            jitter,
            next_slot: Mutex::new(None),
        }
    }

    /// Waits for this caller's slot
    ///
    /// Returns `false` if cancelled while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        let slot = self.reserve().await;
        pause_until(slot, cancel).await
    }

    /// Reserves the next slot and returns the instant it opens
    async fn reserve(&self) -> Instant {
        let mut next = self.next_slot.lock().await;
        let now = Instant::now();
        let slot = next.map_or(now, |n| n.max(now));
        *next = Some(slot + self.min_interval + random_jitter(self.jitter));
        slot
    }

    /// Forgets the reservation clock
    pub async fn reset(&self) {
        *self.next_slot.lock().await = None;
    }
}

/// Uniform jitter in `[0, max]`
pub(crate) fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(millis)
}
