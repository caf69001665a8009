use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::broadcast::{BroadcastSummary, DeliveryResult, MessageTag};

/// Errors from a broadcast store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Broadcast not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Lifecycle state of a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    /// Waiting for its scheduled time
    Scheduled,
    Sending,
    /// Every recipient was attempted
    Completed,
    /// Stopped early by an operator, shutdown or deadline
    Cancelled,
    /// Never sent anything (e.g. recipient resolution failed)
    Failed,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Scheduled => "scheduled",
            BroadcastStatus::Sending => "sending",
            BroadcastStatus::Completed => "completed",
            BroadcastStatus::Cancelled => "cancelled",
            BroadcastStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BroadcastStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(BroadcastStatus::Scheduled),
            "sending" => Ok(BroadcastStatus::Sending),
            "completed" => Ok(BroadcastStatus::Completed),
            "cancelled" => Ok(BroadcastStatus::Cancelled),
            "failed" => Ok(BroadcastStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown status '{}'", other))),
        }
    }
}

/// Creation record for a broadcast
#[derive(Debug, Clone)]
pub struct NewBroadcast {
    pub page_id: String,
    pub template: String,
    pub recipient_count: usize,
    pub status: BroadcastStatus,
    pub message_tag: Option<MessageTag>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Final status update for a broadcast
#[derive(Debug, Clone)]
pub struct BroadcastCompletion {
    pub status: BroadcastStatus,
    pub sent_count: usize,
    pub failed_count: usize,
    pub completed_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl BroadcastCompletion {
    pub fn from_summary(status: BroadcastStatus, summary: BroadcastSummary) -> Self {
        Self {
            status,
            sent_count: summary.succeeded,
            failed_count: summary.failed,
            completed_at: Utc::now(),
            error: None,
        }
    }

    /// Terminal failure before any recipient was attempted
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: BroadcastStatus::Failed,
            sent_count: 0,
            failed_count: 0,
            completed_at: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// A stored broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub id: Uuid,
    pub page_id: String,
    pub template: String,
    pub recipient_count: usize,
    pub sent_count: usize,
    pub failed_count: usize,
    pub status: BroadcastStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_tag: Option<MessageTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BroadcastRecord {
    pub fn new(id: Uuid, broadcast: NewBroadcast) -> Self {
        Self {
            id,
            page_id: broadcast.page_id,
            template: broadcast.template,
            recipient_count: broadcast.recipient_count,
            sent_count: 0,
            failed_count: 0,
            status: broadcast.status,
            message_tag: broadcast.message_tag,
            scheduled_at: broadcast.scheduled_at,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub(crate) fn apply(&mut self, completion: BroadcastCompletion) {
        self.status = completion.status;
        self.sent_count = completion.sent_count;
        self.failed_count = completion.failed_count;
        self.completed_at = Some(completion.completed_at);
        self.error = completion.error;
    }
}

/// A stored per-recipient outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub broadcast_id: Uuid,
    #[serde(flatten)]
    pub result: DeliveryResult,
}
