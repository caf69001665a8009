use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::metrics::AdmissionMetrics;

use super::config::RateLimitConfig;
use super::token_bucket::TokenBucket;

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed,
    Denied { retry_after: Duration },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }
}

/// Limiter statistics
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub enabled: bool,
    pub tracked_pages: usize,
    pub broadcasts_per_hour: u32,
    pub burst: u32,
}

/// Limits how often each page may start a broadcast
#[derive(Debug)]
pub struct BroadcastLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl BroadcastLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take one broadcast slot for `page_id`
    pub fn check(&self, page_id: &str) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed;
        }

        let bucket = self
            .buckets
            .entry(page_id.to_string())
            .or_insert_with(|| {
                Arc::new(TokenBucket::new(
                    self.config.burst.max(1),
                    self.config.broadcasts_per_hour,
                ))
            })
            .clone();

        if bucket.try_consume() {
            AdmissionMetrics::record_allowed();
            RateLimitResult::Allowed
        } else {
            AdmissionMetrics::record_denied();
            let retry_after = bucket.retry_after();
            tracing::warn!(
                page_id = %page_id,
                retry_after_secs = retry_after.as_secs(),
                "Broadcast admission denied"
            );
            RateLimitResult::Denied { retry_after }
        }
    }

    /// Drop buckets idle for longer than the configured TTL
    pub fn cleanup_idle(&self) -> usize {
        let ttl = Duration::from_secs(self.config.idle_ttl_seconds);
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for() < ttl);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, "Removed idle admission buckets");
        }
        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            enabled: self.config.enabled,
            tracked_pages: self.buckets.len(),
            broadcasts_per_hour: self.config.broadcasts_per_hour,
            burst: self.config.burst,
        }
    }
}
