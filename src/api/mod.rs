//! API layer - HTTP endpoint handlers organized by domain.

mod broadcast;
mod health;
mod metrics;
mod routes;
mod spintax;

pub use broadcast::{
    cancel_broadcast, create_broadcast, get_broadcast, list_broadcasts, list_deliveries,
    BroadcastResponse, CreateBroadcastRequest,
};
pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use routes::{api_routes, public_routes};
pub use spintax::preview_spintax;
