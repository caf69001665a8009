//! Graph API wire types.
//!
//! Only the fields this service reads are modelled; everything else in a
//! response is ignored.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::broadcast::{MessageTag, Recipient};

/// One page of `GET /{page-id}/conversations`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationPage {
    #[serde(default)]
    pub data: Vec<Conversation>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl ConversationPage {
    pub fn next_url(&self) -> Option<&str> {
        self.paging.as_ref().and_then(|p| p.next.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub participants: Participants,
    /// Last activity in the conversation; unparseable values count as unknown
    #[serde(default, deserialize_with = "deserialize_graph_time")]
    pub updated_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Participants {
    #[serde(default)]
    pub data: Vec<Participant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Body of `POST /me/messages`
#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub recipient: RecipientRef<'a>,
    pub message: MessageBody<'a>,
    pub messaging_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<MessageTag>,
}

impl<'a> SendMessageRequest<'a> {
    pub fn new(recipient_id: &'a str, text: &'a str, tag: Option<MessageTag>) -> Self {
        Self {
            recipient: RecipientRef { id: recipient_id },
            message: MessageBody { text },
            messaging_type: if tag.is_some() { "MESSAGE_TAG" } else { "RESPONSE" },
            tag,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecipientRef<'a> {
    pub id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct MessageBody<'a> {
    pub text: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub message_id: String,
}

/// Error envelope returned by the Graph API
#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorBody {
    pub error: GraphErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub error_subcode: Option<i64>,
    #[serde(default)]
    pub fbtrace_id: Option<String>,
}

/// Recipients a page may message: participants other than the page itself
/// in conversations updated after `cutoff`, first occurrence wins.
pub fn eligible_recipients(
    conversations: &[Conversation],
    page_id: &str,
    cutoff: DateTime<Utc>,
) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    conversations
        .iter()
        .filter(|c| c.updated_time.is_some_and(|t| t > cutoff))
        .flat_map(|c| c.participants.data.iter())
        .filter(|p| p.id != page_id)
        .filter(|p| seen.insert(p.id.as_str()))
        .map(|p| {
            let recipient = Recipient::new(p.id.as_str());
            match &p.name {
                Some(name) => recipient.with_name(name.as_str()),
                None => recipient,
            }
        })
        .collect()
}

/// Graph timestamps look like `2024-01-31T12:00:00+0000`
pub fn parse_graph_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn deserialize_graph_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(parse_graph_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn conversation(updated: Option<DateTime<Utc>>, participants: &[&str]) -> Conversation {
        Conversation {
            id: "t_1".to_string(),
            participants: Participants {
                data: participants
                    .iter()
                    .map(|id| Participant {
                        id: id.to_string(),
                        name: Some(format!("User {}", id)),
                    })
                    .collect(),
            },
            updated_time: updated,
        }
    }

    #[test]
    fn test_parse_graph_time_formats() {
        let a = parse_graph_time("2024-01-31T12:00:00+0000").unwrap();
        let b = parse_graph_time("2024-01-31T12:00:00Z").unwrap();
        assert_eq!(a, b);
        assert!(parse_graph_time("yesterday").is_none());
    }

    #[test]
    fn test_eligibility_window_and_page_exclusion() {
        let now = Utc::now();
        let cutoff = now - Duration::hours(24);
        let conversations = vec![
            conversation(Some(now - Duration::hours(1)), &["u1", "page"]),
            conversation(Some(now - Duration::hours(30)), &["u2", "page"]),
            conversation(Some(now - Duration::minutes(5)), &["page", "u3"]),
            conversation(None, &["u4", "page"]),
            conversation(Some(now - Duration::hours(2)), &["u1", "page"]),
        ];

        let recipients = eligible_recipients(&conversations, "page", cutoff);
        let ids: Vec<&str> = recipients.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u3"]);
        assert_eq!(recipients[0].name.as_deref(), Some("User u1"));
    }

    #[test]
    fn test_conversation_page_decoding() {
        let json = r#"{
            "data": [
                {
                    "id": "t_10",
                    "updated_time": "2024-01-31T12:00:00+0000",
                    "participants": {"data": [{"id": "u1", "name": "Ana"}, {"id": "p1", "name": "Shop"}]}
                },
                {"id": "t_11", "updated_time": "not a time"}
            ],
            "paging": {"next": "https://graph.example/next"}
        }"#;
        let page: ConversationPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.data.len(), 2);
        assert!(page.data[0].updated_time.is_some());
        assert!(page.data[1].updated_time.is_none());
        assert!(page.data[1].participants.data.is_empty());
        assert_eq!(page.next_url(), Some("https://graph.example/next"));
    }

    #[test]
    fn test_send_request_messaging_type() {
        let plain = serde_json::to_value(SendMessageRequest::new("u1", "hi", None)).unwrap();
        assert_eq!(plain["messaging_type"], "RESPONSE");
        assert!(plain.get("tag").is_none());
        assert_eq!(plain["recipient"]["id"], "u1");

        let tagged = serde_json::to_value(SendMessageRequest::new(
            "u1",
            "hi",
            Some(MessageTag::AccountUpdate),
        ))
        .unwrap();
        assert_eq!(tagged["messaging_type"], "MESSAGE_TAG");
        assert_eq!(tagged["tag"], "ACCOUNT_UPDATE");
    }
}
