use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::RETRY_AFTER;
use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::broadcast::{
    MessageSender, MessageTag, Recipient, RecipientResolver, ResolveError, SendError, SentMessage,
};
use crate::config::GraphConfig;

use super::error::GraphError;
use super::types::{
    eligible_recipients, Conversation, ConversationPage, GraphErrorBody, SendMessageRequest,
    SendMessageResponse,
};

/// Shared Graph API client.
///
/// Cheap to clone; every clone reuses the same connection pool.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    eligibility_window: chrono::Duration,
    max_conversation_pages: usize,
    conversations_page_size: u32,
}

impl GraphClient {
    pub fn new(config: &GraphConfig) -> Result<Self, GraphError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            eligibility_window: chrono::Duration::hours(config.eligibility_window_hours as i64),
            max_conversation_pages: config.max_conversation_pages.max(1),
            conversations_page_size: config.conversations_page_size,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Bind the client to one page and its access token
    pub fn page(
        &self,
        page_id: impl Into<String>,
        access_token: impl Into<String>,
        message_tag: Option<MessageTag>,
    ) -> PageMessenger {
        PageMessenger {
            client: self.clone(),
            page_id: page_id.into(),
            access_token: access_token.into(),
            message_tag,
        }
    }
}

/// Graph API access on behalf of one page
#[derive(Clone)]
pub struct PageMessenger {
    client: GraphClient,
    page_id: String,
    access_token: String,
    message_tag: Option<MessageTag>,
}

impl fmt::Debug for PageMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageMessenger")
            .field("page_id", &self.page_id)
            .field("access_token", &"<redacted>")
            .field("message_tag", &self.message_tag)
            .finish()
    }
}

impl PageMessenger {
    /// Fetch the page's conversations, following pagination
    #[tracing::instrument(name = "graph.conversations", skip(self), fields(page_id = %self.page_id))]
    pub async fn fetch_conversations(&self) -> Result<Vec<Conversation>, GraphError> {
        let url = format!("{}/{}/conversations", self.client.base_url, self.page_id);
        let first = self
            .client
            .http
            .get(&url)
            .query(&[
                ("access_token", self.access_token.as_str()),
                ("fields", "participants,updated_time"),
            ])
            .query(&[("limit", self.client.conversations_page_size)])
            .send()
            .await?;

        let mut page: ConversationPage = read_json(first).await?;
        let mut conversations = std::mem::take(&mut page.data);
        let mut fetched = 1;

        while let Some(next) = page.next_url().map(str::to_string) {
            if fetched >= self.client.max_conversation_pages {
                tracing::debug!(pages = fetched, "Conversation page limit reached");
                break;
            }
            let response = self.client.http.get(next).send().await?;
            page = read_json(response).await?;
            conversations.append(&mut page.data);
            fetched += 1;
        }

        tracing::debug!(
            pages = fetched,
            conversations = conversations.len(),
            "Fetched conversations"
        );
        Ok(conversations)
    }

    /// Send one text message through the Send API
    #[tracing::instrument(
        name = "graph.send",
        skip(self, text),
        fields(page_id = %self.page_id, tag = ?self.message_tag)
    )]
    pub async fn send_text(&self, recipient_id: &str, text: &str) -> Result<SentMessage, GraphError> {
        let url = format!("{}/me/messages", self.client.base_url);
        let response = self
            .client
            .http
            .post(&url)
            .query(&[("access_token", self.access_token.as_str())])
            .json(&SendMessageRequest::new(recipient_id, text, self.message_tag))
            .send()
            .await?;

        let sent: SendMessageResponse = read_json(response).await?;
        tracing::debug!(
            recipient_id = sent.recipient_id.as_deref().unwrap_or(recipient_id),
            message_id = %sent.message_id,
            "Message accepted"
        );
        Ok(SentMessage {
            message_id: sent.message_id,
        })
    }
}

#[async_trait]
impl RecipientResolver for PageMessenger {
    async fn eligible_recipients(&self, page_id: &str) -> Result<Vec<Recipient>, ResolveError> {
        // The access token belongs to one page; never resolve another page's inbox with it
        if page_id != self.page_id {
            return Err(ResolveError::PermissionDenied(format!(
                "messenger for page {} cannot resolve recipients of page {}",
                self.page_id, page_id
            )));
        }

        let conversations = self.fetch_conversations().await?;
        let cutoff = Utc::now() - self.client.eligibility_window;
        let recipients = eligible_recipients(&conversations, &self.page_id, cutoff);

        tracing::info!(
            page_id = %page_id,
            conversations = conversations.len(),
            eligible = recipients.len(),
            "Resolved eligible recipients"
        );
        Ok(recipients)
    }
}

#[async_trait]
impl MessageSender for PageMessenger {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<SentMessage, SendError> {
        self.send_text(recipient_id, text).await.map_err(SendError::from)
    }
}

/// Decode a success body, or turn an error response into `GraphError::Api`
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, GraphError> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.bytes().await?;

    if status.is_success() {
        return serde_json::from_slice(&body).map_err(|e| GraphError::Decode(e.to_string()));
    }

    let (code, subcode, message) = match serde_json::from_slice::<GraphErrorBody>(&body) {
        Ok(envelope) => {
            let detail = envelope.error;
            tracing::debug!(
                status = status.as_u16(),
                code = ?detail.code,
                subcode = ?detail.error_subcode,
                error_type = ?detail.kind,
                fbtrace_id = ?detail.fbtrace_id,
                "Graph API returned an error"
            );
            (detail.code, detail.error_subcode, detail.message)
        }
        Err(_) => {
            tracing::debug!(status = status.as_u16(), "Graph API returned a non-JSON error");
            (None, None, String::from_utf8_lossy(&body).into_owned())
        }
    };

    Err(GraphError::Api {
        status: status.as_u16(),
        code,
        subcode,
        message,
        retry_after,
    })
}
