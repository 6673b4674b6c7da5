//! Gmail API v1: unread mail → actionable items.
//!
//! Lists messages matching the account's query (default
//! `is:unread newer_than:1d`), fetches metadata headers for each, and runs
//! them through the extractor. Bulk mail (Precedence bulk/list, or a
//! List-Unsubscribe header) is dropped before extraction.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{check_response, GoogleApiError, GoogleSession};
use crate::extract::{build_item, ExtractError, Extractor, RawSignal};
use crate::error::AdapterError;
use crate::integrations::IntegrationAdapter;
use crate::types::{ActionableItem, IntegrationKey, PollOutcome};

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
pub const DEFAULT_QUERY: &str = "is:unread newer_than:1d";
const MAX_RESULTS: u32 = 50;

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

impl MessageDetail {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn is_bulk(&self) -> bool {
        let precedence = self.header("Precedence").unwrap_or_default().to_lowercase();
        precedence == "bulk"
            || precedence == "list"
            || self
                .header("List-Unsubscribe")
                .is_some_and(|v| !v.trim().is_empty())
    }

    fn to_signal(&self) -> RawSignal {
        RawSignal {
            source_reference: self.id.clone(),
            subject: self.header("Subject").unwrap_or_default().to_string(),
            body: self.snippet.clone(),
            sender: self.header("From").map(str::to_string),
            received_at: self
                .header("Date")
                .and_then(|d| chrono::DateTime::parse_from_rfc2822(d.trim()).ok())
                .map(|d| d.with_timezone(&chrono::Utc)),
            due_date: None,
            provider_priority: None,
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

pub struct GmailAdapter {
    session: GoogleSession,
    extractor: Arc<dyn Extractor>,
    query: String,
}

impl GmailAdapter {
    pub fn new(session: GoogleSession, extractor: Arc<dyn Extractor>, query: Option<&str>) -> Self {
        Self {
            session,
            extractor,
            query: query.unwrap_or(DEFAULT_QUERY).to_string(),
        }
    }

    async fn fetch_messages(&self, access_token: &str) -> Result<Vec<MessageDetail>, GoogleApiError> {
        let client = self.session.client();
        let resp = client
            .get(format!("{}/messages", GMAIL_API))
            .bearer_auth(access_token)
            .query(&[
                ("q", self.query.as_str()),
                ("maxResults", &MAX_RESULTS.to_string()),
            ])
            .send()
            .await?;
        let list: MessageListResponse = check_response(resp).await?.json().await?;

        let mut messages = Vec::with_capacity(list.messages.len());
        for stub in &list.messages {
            match self.fetch_metadata(access_token, &stub.id).await {
                Ok(detail) => messages.push(detail),
                // Auth loss mid-listing fails the poll; anything else skips one message
                Err(GoogleApiError::AuthExpired) => return Err(GoogleApiError::AuthExpired),
                Err(e) => log::debug!("Gmail: skipping message {}: {}", stub.id, e),
            }
        }
        Ok(messages)
    }

    async fn fetch_metadata(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<MessageDetail, GoogleApiError> {
        let resp = self
            .session
            .client()
            .get(format!("{}/messages/{}", GMAIL_API, message_id))
            .bearer_auth(access_token)
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Subject"),
                ("metadataHeaders", "Date"),
                ("metadataHeaders", "List-Unsubscribe"),
                ("metadataHeaders", "Precedence"),
            ])
            .send()
            .await?;
        Ok(check_response(resp).await?.json().await?)
    }
}

/// Run non-bulk messages through the extractor. A service failure aborts the
/// batch so the whole poll is retried next cycle.
async fn messages_to_items(
    extractor: &dyn Extractor,
    key: &IntegrationKey,
    messages: &[MessageDetail],
) -> Result<Vec<ActionableItem>, ExtractError> {
    let mut items = Vec::new();
    for message in messages.iter().filter(|m| !m.is_bulk()) {
        if let Some(item) = build_item(extractor, key, &message.to_signal()).await? {
            items.push(item);
        }
    }
    Ok(items)
}

#[async_trait]
impl IntegrationAdapter for GmailAdapter {
    fn key(&self) -> &IntegrationKey {
        self.session.key()
    }

    async fn poll(&self) -> PollOutcome {
        let access_token = match self.session.access_token().await {
            Ok(t) => t,
            Err(e) => return e.into_outcome(),
        };
        let messages = match self.fetch_messages(&access_token).await {
            Ok(m) => m,
            Err(e) => return e.into_outcome(),
        };
        match messages_to_items(self.extractor.as_ref(), self.key(), &messages).await {
            Ok(items) => {
                log::debug!(
                    "Gmail: {} items from {} messages for {}",
                    items.len(),
                    messages.len(),
                    self.key()
                );
                PollOutcome::Success(items)
            }
            Err(e) => AdapterError::from(e).into(),
        }
    }

    async fn test_connection(&self) -> bool {
        let Ok(access_token) = self.session.current_access_token().await else {
            return false;
        };
        match self
            .session
            .client()
            .get(format!("{}/profile", GMAIL_API))
            .bearer_auth(&access_token)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                log::debug!("Gmail: connection test failed for {}: {}", self.key(), e);
                false
            }
        }
    }
}
