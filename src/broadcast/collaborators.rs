//! Interfaces the broadcast core depends on.

use async_trait::async_trait;

use super::types::{DeliveryResult, Recipient, ResolveError, SendError, SentMessage};

/// Source of the recipients a page may currently message
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    /// Snapshot of eligible recipients, in provider order
    async fn eligible_recipients(&self, page_id: &str) -> Result<Vec<Recipient>, ResolveError>;
}

/// Delivers one text message to one recipient
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<SentMessage, SendError>;
}

/// Receives every delivery result as soon as the dispatcher produces it
#[async_trait]
pub trait DeliveryObserver: Send {
    async fn observe(&mut self, result: DeliveryResult);
}

#[async_trait]
impl DeliveryObserver for Vec<DeliveryResult> {
    async fn observe(&mut self, result: DeliveryResult) {
        self.push(result);
    }
}

/// Discards results; the run summary is still returned
#[async_trait]
impl DeliveryObserver for () {
    async fn observe(&mut self, _result: DeliveryResult) {}
}
