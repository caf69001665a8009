use serde::Deserialize;

/// Per-page broadcast admission limit
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Sustained broadcasts per page per hour
    #[serde(default = "default_broadcasts_per_hour")]
    pub broadcasts_per_hour: u32,
    /// Broadcasts a page may start back to back
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Forget a page's bucket after this much inactivity
    #[serde(default = "default_idle_ttl_seconds")]
    pub idle_ttl_seconds: u64,
    /// How often idle buckets are swept
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

fn default_broadcasts_per_hour() -> u32 {
    10
}

fn default_burst() -> u32 {
    3
}

fn default_idle_ttl_seconds() -> u64 {
    7200 // 2 hours
}

fn default_cleanup_interval_seconds() -> u64 {
    300 // 5 minutes
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broadcasts_per_hour: default_broadcasts_per_hour(),
            burst: default_burst(),
            idle_ttl_seconds: default_idle_ttl_seconds(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}
