use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::broadcast::{BackoffConfig, DispatchConfig, PacingPolicy};
use crate::ratelimit::RateLimitConfig;

/// Prefix of environment variable overrides, e.g. `PAGECAST__SERVER__PORT`
const ENV_PREFIX: &str = "PAGECAST";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub ratelimit: RateLimitConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Required `X-API-Key` value; API key auth is off when unset
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    /// Graph API base URL including the API version
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,
    #[serde(default = "default_graph_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_graph_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Conversations updated within this window are messageable
    #[serde(default = "default_eligibility_window_hours")]
    pub eligibility_window_hours: u64,
    /// Upper bound on conversation pages fetched per resolution
    #[serde(default = "default_max_conversation_pages")]
    pub max_conversation_pages: usize,
    #[serde(default = "default_conversations_page_size")]
    pub conversations_page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Pause between two sends of one broadcast
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
    /// Slow down after provider rate-limit responses
    #[serde(default = "default_true")]
    pub backoff_on_rate_limit: bool,
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Stop a broadcast that runs longer than this
    #[serde(default)]
    pub max_duration_seconds: Option<u64>,
    /// How long shutdown waits for cancelled broadcasts to wind down
    #[serde(default = "default_shutdown_drain_seconds")]
    pub shutdown_drain_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `memory` or `postgres`
    #[serde(default = "default_database_backend")]
    pub backend: String,
    pub url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    /// OTLP gRPC endpoint
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Trace sampling ratio (0.0-1.0)
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit_bytes() -> usize {
    64 * 1024
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}

fn default_graph_request_timeout() -> u64 {
    30
}

fn default_graph_connect_timeout() -> u64 {
    10
}

fn default_eligibility_window_hours() -> u64 {
    24
}

fn default_max_conversation_pages() -> usize {
    10
}

fn default_conversations_page_size() -> u32 {
    100
}

fn default_send_delay_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_shutdown_drain_seconds() -> u64 {
    10
}

fn default_database_backend() -> String {
    "memory".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    300 // 5 minutes
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "pagecast-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // PAGECAST__SERVER__PORT, PAGECAST__API__KEY, PAGECAST__DATABASE__URL, ...
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Dispatcher configuration derived from the `broadcast` section
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            pacing: PacingPolicy {
                send_delay: Duration::from_millis(self.broadcast.send_delay_ms),
                backoff_on_rate_limit: self.broadcast.backoff_on_rate_limit,
                backoff: self.broadcast.backoff.clone(),
            },
            max_duration: self.broadcast.max_duration_seconds.map(Duration::from_secs),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            request_timeout_seconds: default_graph_request_timeout(),
            connect_timeout_seconds: default_graph_connect_timeout(),
            eligibility_window_hours: default_eligibility_window_hours(),
            max_conversation_pages: default_max_conversation_pages(),
            conversations_page_size: default_conversations_page_size(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            send_delay_ms: default_send_delay_ms(),
            backoff_on_rate_limit: true,
            backoff: BackoffConfig::default(),
            max_duration_seconds: None,
            shutdown_drain_seconds: default_shutdown_drain_seconds(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_database_backend(),
            url: None,
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
