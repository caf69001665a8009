// Core engine
pub mod broadcast;
pub mod spintax;

// Adapters and infrastructure
pub mod config;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod ratelimit;
pub mod store;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod shutdown;
pub mod tasks;
pub mod telemetry;
