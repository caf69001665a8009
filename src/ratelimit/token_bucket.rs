//! Token Bucket algorithm implementation

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token bucket refilled at a fixed hourly rate.
///
/// Tokens are fractional so slow rates (a few per hour) refill smoothly
/// instead of in whole-token steps.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    /// Maximum bucket capacity
    capacity: u32,
    /// Tokens added per hour
    refill_per_hour: u32,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    last_activity: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: u32, refill_per_hour: u32) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: now,
                last_activity: now,
            }),
            capacity,
            refill_per_hour,
        }
    }

    fn refill_per_sec(&self) -> f64 {
        self.refill_per_hour as f64 / 3600.0
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec()).min(self.capacity as f64);
        state.last_refill = now;
    }

    /// Try to take one token.
    /// Returns true if a token was available, false otherwise.
    pub fn try_consume(&self) -> bool {
        let now = Instant::now();
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.refill(&mut state, now);
        state.last_activity = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available
    pub fn available(&self) -> u32 {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.refill(&mut state, Instant::now());
        state.tokens.floor() as u32
    }

    /// Time until at least one token is available
    pub fn retry_after(&self) -> Duration {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.refill(&mut state, Instant::now());

        let missing = 1.0 - state.tokens;
        if missing <= 0.0 {
            return Duration::ZERO;
        }
        let rate = self.refill_per_sec();
        if rate <= 0.0 {
            return Duration::from_secs(3600);
        }
        Duration::from_secs_f64(missing / rate)
    }

    /// Time since the bucket was last asked for a token
    pub fn idle_for(&self) -> Duration {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.last_activity.elapsed()
    }
}
