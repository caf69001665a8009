use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A user the page is allowed to message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Page-scoped user ID
    pub id: String,
    /// Display name, when the provider reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Recipient {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Provider acknowledgement of a delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: String,
}

/// Outcome of one send attempt for one recipient.
///
/// Created once by the dispatcher and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub recipient_id: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_message_id: Option<String>,
    /// The personalized text that was sent (or attempted)
    pub message: String,
    pub completed_at: DateTime<Utc>,
}

impl DeliveryResult {
    pub fn sent(recipient_id: impl Into<String>, message: String, sent: SentMessage) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            succeeded: true,
            error_detail: None,
            sent_message_id: Some(sent.message_id),
            message,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(
        recipient_id: impl Into<String>,
        message: String,
        error_detail: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            succeeded: false,
            error_detail: Some(error_detail.into()),
            sent_message_id: None,
            message,
            completed_at: Utc::now(),
        }
    }
}

/// Aggregate counts over the delivery results of one broadcast.
///
/// `succeeded + failed == total` holds for every value produced by this type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BroadcastSummary {
    /// Fold a set of delivery results into a summary
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a DeliveryResult>,
    {
        results
            .into_iter()
            .fold(Self::default(), |summary, result| summary.with(result))
    }

    fn with(mut self, result: &DeliveryResult) -> Self {
        self.total += 1;
        if result.succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self
    }
}

/// Running fold of the results produced so far in a broadcast run.
///
/// Only the dispatcher running the broadcast records into it.
#[derive(Debug, Default)]
pub struct BroadcastTally {
    summary: BroadcastSummary,
}

impl BroadcastTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &DeliveryResult) {
        self.summary = self.summary.with(result);
    }

    pub fn summary(&self) -> BroadcastSummary {
        self.summary
    }
}

/// Messenger message tags allowing sends outside the standard window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageTag {
    ConfirmedEventUpdate,
    PostPurchaseUpdate,
    AccountUpdate,
    HumanAgent,
}

impl MessageTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageTag::ConfirmedEventUpdate => "CONFIRMED_EVENT_UPDATE",
            MessageTag::PostPurchaseUpdate => "POST_PURCHASE_UPDATE",
            MessageTag::AccountUpdate => "ACCOUNT_UPDATE",
            MessageTag::HumanAgent => "HUMAN_AGENT",
        }
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED_EVENT_UPDATE" => Ok(MessageTag::ConfirmedEventUpdate),
            "POST_PURCHASE_UPDATE" => Ok(MessageTag::PostPurchaseUpdate),
            "ACCOUNT_UPDATE" => Ok(MessageTag::AccountUpdate),
            "HUMAN_AGENT" => Ok(MessageTag::HumanAgent),
            other => Err(format!("unknown message tag: {}", other)),
        }
    }
}

/// Why a broadcast run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every recipient was attempted
    Completed,
    /// An operator or shutdown cancelled the run
    Cancelled,
    /// The configured maximum run time elapsed
    DeadlineExceeded,
}

/// Failure to deliver a single message.
///
/// The dispatcher treats every variant as "this recipient failed";
/// `RateLimited` additionally slows down the following sends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("Rate limited by provider: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error{}: {message}", code_suffix(.code))]
    Provider { code: Option<i64>, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SendError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SendError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SendError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(" ({})", c)).unwrap_or_default()
}

/// Failure to resolve the recipients of a page
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Recipient source unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(id: &str) -> DeliveryResult {
        DeliveryResult::sent(
            id,
            "hi".to_string(),
            SentMessage {
                message_id: format!("m-{}", id),
            },
        )
    }

    fn err(id: &str) -> DeliveryResult {
        DeliveryResult::failed(id, "hi".to_string(), "boom")
    }

    #[test]
    fn test_summary_fold() {
        let results = vec![ok("a"), err("b"), ok("c")];
        let summary = BroadcastSummary::from_results(&results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_tally_matches_fold_at_every_step() {
        let results = vec![ok("a"), err("b"), err("c"), ok("d")];
        let mut tally = BroadcastTally::new();
        for (i, result) in results.iter().enumerate() {
            tally.record(result);
            let expected = BroadcastSummary::from_results(&results[..=i]);
            assert_eq!(tally.summary(), expected);
            let s = tally.summary();
            assert_eq!(s.succeeded + s.failed, s.total);
        }
    }

    #[test]
    fn test_message_tag_round_trip() {
        let tag: MessageTag = "ACCOUNT_UPDATE".parse().unwrap();
        assert_eq!(tag, MessageTag::AccountUpdate);
        assert_eq!(tag.to_string(), "ACCOUNT_UPDATE");
        assert!("NOPE".parse::<MessageTag>().is_err());

        let json = serde_json::to_string(&MessageTag::HumanAgent).unwrap();
        assert_eq!(json, "\"HUMAN_AGENT\"");
    }

    #[test]
    fn test_send_error_display() {
        let err = SendError::Provider {
            code: Some(100),
            message: "Invalid parameter".to_string(),
        };
        assert_eq!(err.to_string(), "Provider error (100): Invalid parameter");

        let err = SendError::RateLimited {
            message: "slow down".to_string(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }
}
