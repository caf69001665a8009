//! Broadcast record persistence.
//!
//! # Backend Architecture
//!
//! - `MemoryBroadcastStore`: in-process storage using DashMap (default)
//! - `PostgresBroadcastStore`: `broadcasts` + `broadcast_deliveries` tables
//!
//! Use `create_broadcast_store()` to build the backend named in configuration.

mod memory;
mod postgres;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::broadcast::DeliveryResult;
use crate::config::DatabaseConfig;

pub use memory::MemoryBroadcastStore;
pub use postgres::PostgresBroadcastStore;
pub use types::{
    BroadcastCompletion, BroadcastRecord, BroadcastStatus, DeliveryRecord, NewBroadcast,
    StoreError,
};

/// Persistence sink for broadcasts and their per-recipient outcomes
#[async_trait]
pub trait BroadcastRecordStore: Send + Sync {
    /// Store a new broadcast and return it with its assigned ID
    async fn create(&self, broadcast: NewBroadcast) -> Result<BroadcastRecord, StoreError>;

    /// Move a scheduled broadcast to `sending` once its recipients are known
    async fn mark_sending(&self, id: Uuid, recipient_count: usize) -> Result<(), StoreError>;

    /// Append one per-recipient outcome
    async fn record_delivery(&self, id: Uuid, result: &DeliveryResult) -> Result<(), StoreError>;

    /// Write the final status and counts
    async fn complete(&self, id: Uuid, completion: BroadcastCompletion) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<BroadcastRecord>, StoreError>;

    /// Most recent broadcasts first, optionally for one page
    async fn list(
        &self,
        page_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<BroadcastRecord>, StoreError>;

    /// Delivery records of one broadcast, in delivery order
    async fn deliveries(&self, id: Uuid) -> Result<Vec<DeliveryRecord>, StoreError>;
}

/// Create the broadcast store named by `config.backend`.
///
/// - `"postgres"`: connects to `config.url`; falls back to memory when no URL is set
/// - anything else: `MemoryBroadcastStore`
pub async fn create_broadcast_store(
    config: &DatabaseConfig,
) -> Result<Arc<dyn BroadcastRecordStore>, StoreError> {
    match config.backend.as_str() {
        "postgres" => match &config.url {
            Some(url) => {
                tracing::info!(backend = "postgres", "Creating PostgreSQL broadcast store");
                let store = PostgresBroadcastStore::connect(url, config).await?;
                store.ensure_schema().await?;
                Ok(Arc::new(store))
            }
            None => {
                tracing::warn!(
                    "PostgreSQL broadcast store requested but no database URL set, falling back to memory"
                );
                Ok(Arc::new(MemoryBroadcastStore::new()))
            }
        },
        _ => {
            tracing::info!(backend = "memory", "Creating memory broadcast store");
            Ok(Arc::new(MemoryBroadcastStore::new()))
        }
    }
}
