//! Retry delay policy
//!
//! `delay = min(base * 2^attempt + uniform(0, jitter), cap)`, where the cap
//! depends on the failure kind. Server errors use a fixed cool-down instead.

use crate::config::BackoffConfig;
use crate::state::random_jitter;
use crate::ErrorKind;
use std::time::Duration;

/// Exponent ceiling; `2^20` times any sane base already exceeds every cap
const MAX_EXPONENT: u32 = 20;

/// Backoff settings for each retryable failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub jitter: Duration,
    pub max_backoff: Duration,
    pub transient_cap: Duration,
    pub server_cooldown: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base),
            jitter: Duration::from_millis(config.jitter),
            max_backoff: Duration::from_millis(config.max_backoff),
            transient_cap: Duration::from_millis(config.transient_cap),
            server_cooldown: Duration::from_millis(config.server_cooldown),
        }
    }

    /// Cap applied to the exponential delay for a failure kind
    pub fn cap_for(&self, kind: ErrorKind) -> Duration {
        match kind {
            ErrorKind::Transient => self.transient_cap,
            _ => self.max_backoff,
        }
    }

    /// Exponential delay without jitter, bounded by `cap`
    pub fn nominal(&self, attempt: u32, cap: Duration) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(MAX_EXPONENT));
        self.base.saturating_mul(factor).min(cap)
    }

    /// Delay before retrying after the given failure
    ///
    /// `attempt` is the number of consecutive failures before this one.
    pub fn delay(&self, kind: ErrorKind, attempt: u32) -> Duration {
        match kind {
            ErrorKind::ServerError => self.server_cooldown,
            ErrorKind::RateLimited | ErrorKind::Transient => {
                let cap = self.cap_for(kind);
                let exponent = 2u32.saturating_pow(attempt.min(MAX_EXPONENT));
                self.base
                    .saturating_mul(exponent)
                    .saturating_add(random_jitter(self.jitter))
                    .min(cap)
            }
            _ => Duration::ZERO,
        }
    }

    /// Delay to use when the upstream supplied a retry hint
    pub fn honor_hint(&self, hint: Duration) -> Duration {
        hint.min(self.max_backoff)
    }
}
