//! Send pacing for a broadcast run.
//!
//! Sends are spaced by a fixed delay to stay under the provider's abuse
//! limits. After a rate-limited send the next pause grows with exponential
//! backoff (and honours the provider's retry hint); a successful send
//! returns the pace to the fixed delay.

use std::time::Duration;

use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::types::SendError;

/// Pacing configuration for one dispatcher
#[derive(Debug, Clone)]
pub struct PacingPolicy {
    /// Pause between two consecutive sends
    pub send_delay: Duration,
    /// Whether rate-limit responses slow down the following sends
    pub backoff_on_rate_limit: bool,
    pub backoff: BackoffConfig,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            send_delay: Duration::from_millis(100),
            backoff_on_rate_limit: true,
            backoff: BackoffConfig::default(),
        }
    }
}

impl PacingPolicy {
    /// No pauses at all
    pub fn immediate() -> Self {
        Self {
            send_delay: Duration::ZERO,
            backoff_on_rate_limit: false,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Per-run pacing state
#[derive(Debug)]
pub struct Pacer {
    send_delay: Duration,
    backoff_on_rate_limit: bool,
    backoff: ExponentialBackoff,
    penalty: Option<Duration>,
}

impl Pacer {
    pub fn new(policy: &PacingPolicy) -> Self {
        Self {
            send_delay: policy.send_delay,
            backoff_on_rate_limit: policy.backoff_on_rate_limit,
            backoff: ExponentialBackoff::with_config(policy.backoff.clone()),
            penalty: None,
        }
    }

    /// Feed the outcome of the last send
    pub fn observe<T>(&mut self, outcome: &Result<T, SendError>) {
        match outcome {
            Ok(_) => {
                self.backoff.reset();
                self.penalty = None;
            }
            Err(e) if e.is_rate_limited() && self.backoff_on_rate_limit => {
                let delay = self.backoff.next_delay();
                let delay = e.retry_after().map_or(delay, |hint| hint.max(delay));
                tracing::warn!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = self.backoff.attempt(),
                    "Provider rate limit hit, slowing down"
                );
                self.penalty = Some(delay);
            }
            Err(_) => {
                self.penalty = None;
            }
        }
    }

    /// Pause to take before the next send
    pub fn next_pause(&mut self) -> Duration {
        match self.penalty.take() {
            Some(penalty) => penalty.max(self.send_delay),
            None => self.send_delay,
        }
    }
}
