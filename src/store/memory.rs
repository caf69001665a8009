//! In-memory broadcast store.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::broadcast::DeliveryResult;

use super::types::{
    BroadcastCompletion, BroadcastRecord, BroadcastStatus, DeliveryRecord, NewBroadcast,
    StoreError,
};
use super::BroadcastRecordStore;

/// Broadcast store kept in process memory. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBroadcastStore {
    broadcasts: DashMap<Uuid, BroadcastRecord>,
    deliveries: DashMap<Uuid, Vec<DeliveryResult>>,
}

impl MemoryBroadcastStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BroadcastRecordStore for MemoryBroadcastStore {
    async fn create(&self, broadcast: NewBroadcast) -> Result<BroadcastRecord, StoreError> {
        let id = Uuid::new_v4();
        let record = BroadcastRecord::new(id, broadcast);
        self.broadcasts.insert(id, record.clone());
        self.deliveries.insert(id, Vec::new());
        Ok(record)
    }

    async fn mark_sending(&self, id: Uuid, recipient_count: usize) -> Result<(), StoreError> {
        let mut record = self.broadcasts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.status = BroadcastStatus::Sending;
        record.recipient_count = recipient_count;
        Ok(())
    }

    async fn record_delivery(&self, id: Uuid, result: &DeliveryResult) -> Result<(), StoreError> {
        let mut deliveries = self.deliveries.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        deliveries.push(result.clone());
        Ok(())
    }

    async fn complete(&self, id: Uuid, completion: BroadcastCompletion) -> Result<(), StoreError> {
        let mut record = self.broadcasts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.apply(completion);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BroadcastRecord>, StoreError> {
        Ok(self.broadcasts.get(&id).map(|r| r.clone()))
    }

    async fn list(
        &self,
        page_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<BroadcastRecord>, StoreError> {
        let mut records: Vec<BroadcastRecord> = self
            .broadcasts
            .iter()
            .filter(|entry| page_id.map_or(true, |p| entry.page_id == p))
            .map(|entry| entry.value().clone())
            .collect();

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn deliveries(&self, id: Uuid) -> Result<Vec<DeliveryRecord>, StoreError> {
        let deliveries = self.deliveries.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(deliveries
            .iter()
            .map(|result| DeliveryRecord {
                broadcast_id: id,
                result: result.clone(),
            })
            .collect())
    }
}
