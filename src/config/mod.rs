mod settings;

pub use settings::{
    ApiConfig, BroadcastConfig, DatabaseConfig, GraphConfig, OtelConfig, ServerConfig, Settings,
};
