//! Per-page broadcast admission limit using the Token Bucket algorithm.
//!
//! Each page gets its own bucket (capacity = `burst`, refilled at
//! `broadcasts_per_hour`). Buckets live in process memory.

mod config;
mod limiter;
mod token_bucket;

pub use config::RateLimitConfig;
pub use limiter::{BroadcastLimiter, RateLimitResult, RateLimiterStats};
pub use token_bucket::TokenBucket;
