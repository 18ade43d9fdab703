//! State module for tracking crawl progress
//!
//! This module provides the shared, process-local state of a crawl pass.
//!
//! # Components
//!
//! - `Counters`: atomics and an error histogram observed by the reporter
//! - `RateGate`: the single shared inter-request gap
//! - `pause` / `pause_until`: cancellable sleeps used at every suspension point

mod counters;
mod rate_gate;
mod shutdown;

// Re-export main types
pub use counters::{CounterSnapshot, Counters};
pub use rate_gate::RateGate;
pub(crate) use rate_gate::random_jitter;
pub use shutdown::{pause, pause_until};
