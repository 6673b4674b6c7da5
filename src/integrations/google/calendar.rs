//! Google Calendar API v3: pending invitations → actionable items.
//!
//! An event becomes an item when the account's own attendee entry is still
//! `needsAction` and the event starts within the lookahead window. The due
//! date is the event's start date.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::{check_response, GoogleApiError, GoogleSession};
use crate::extract::{build_item, Extractor, RawSignal};
use crate::error::AdapterError;
use crate::integrations::IntegrationAdapter;
use crate::types::{ActionableItem, IntegrationKey, PollOutcome};

const EVENTS_URL: &str = "https://www.googleapis.com/calendar/v3/calendars/primary/events";
const LOOKAHEAD_DAYS: i64 = 7;

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<EventRaw>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: Option<EventDateTime>,
    #[serde(default)]
    attendees: Vec<Attendee>,
    organizer: Option<Organizer>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attendee {
    #[serde(default)]
    response_status: Option<String>,
    #[serde(rename = "self", default)]
    is_self: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Organizer {
    #[serde(default)]
    email: String,
}

impl EventRaw {
    fn awaiting_response(&self) -> bool {
        self.status.as_deref() != Some("cancelled")
            && self.attendees.iter().any(|a| {
                a.is_self == Some(true) && a.response_status.as_deref() == Some("needsAction")
            })
    }

    fn start_date(&self) -> Option<NaiveDate> {
        let start = self.start.as_ref()?;
        if let Some(ref dt) = start.date_time {
            return DateTime::parse_from_rfc3339(dt).ok().map(|d| d.date_naive());
        }
        start
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    }

    fn to_signal(&self) -> RawSignal {
        let summary = self
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("(No title)");
        RawSignal {
            source_reference: self.id.clone(),
            subject: format!("Respond to invite: {}", summary),
            body: self.description.clone().unwrap_or_default(),
            sender: self
                .organizer
                .as_ref()
                .map(|o| o.email.clone())
                .filter(|e| !e.is_empty()),
            received_at: None,
            due_date: self.start_date(),
            provider_priority: None,
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

pub struct CalendarAdapter {
    session: GoogleSession,
    extractor: Arc<dyn Extractor>,
}

impl CalendarAdapter {
    pub fn new(session: GoogleSession, extractor: Arc<dyn Extractor>) -> Self {
        Self { session, extractor }
    }

    async fn fetch_pending(
        &self,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventRaw>, GoogleApiError> {
        let time_min = now.to_rfc3339();
        let time_max = (now + chrono::Duration::days(LOOKAHEAD_DAYS)).to_rfc3339();

        let mut pending = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .session
                .client()
                .get(EVENTS_URL)
                .bearer_auth(access_token)
                .query(&[
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("maxResults", "250"),
                ]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let body: EventListResponse = check_response(request.send().await?)
                .await?
                .json()
                .await?;
            pending.extend(body.items.into_iter().filter(EventRaw::awaiting_response));

            page_token = body.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        Ok(pending)
    }
}

async fn events_to_items(
    extractor: &dyn Extractor,
    key: &IntegrationKey,
    events: &[EventRaw],
) -> Result<Vec<ActionableItem>, crate::extract::ExtractError> {
    let mut items = Vec::new();
    for event in events {
        if let Some(item) = build_item(extractor, key, &event.to_signal()).await? {
            items.push(item);
        }
    }
    Ok(items)
}

#[async_trait]
impl IntegrationAdapter for CalendarAdapter {
    fn key(&self) -> &IntegrationKey {
        self.session.key()
    }

    async fn poll(&self) -> PollOutcome {
        let access_token = match self.session.access_token().await {
            Ok(t) => t,
            Err(e) => return e.into_outcome(),
        };
        let events = match self.fetch_pending(&access_token, Utc::now()).await {
            Ok(e) => e,
            Err(e) => return e.into_outcome(),
        };
        match events_to_items(self.extractor.as_ref(), self.key(), &events).await {
            Ok(items) => PollOutcome::Success(items),
            Err(e) => AdapterError::from(e).into(),
        }
    }

    async fn test_connection(&self) -> bool {
        let Ok(access_token) = self.session.current_access_token().await else {
            return false;
        };
        self.session
            .client()
            .get("https://www.googleapis.com/calendar/v3/calendars/primary")
            .bearer_auth(&access_token)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::HeuristicExtractor;
    use crate::types::ProviderType;

    fn event(json: serde_json::Value) -> EventRaw {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_awaiting_response_requires_self_needs_action() {
        let pending = event(serde_json::json!({
            "id": "e1",
            "attendees": [
                {"email": "me@example.com", "self": true, "responseStatus": "needsAction"},
                {"email": "other@example.com", "responseStatus": "accepted"}
            ]
        }));
        let accepted = event(serde_json::json!({
            "id": "e2",
            "attendees": [{"self": true, "responseStatus": "accepted"}]
        }));
        let other_pending = event(serde_json::json!({
            "id": "e3",
            "attendees": [{"responseStatus": "needsAction"}]
        }));
        let cancelled = event(serde_json::json!({
            "id": "e4",
            "status": "cancelled",
            "attendees": [{"self": true, "responseStatus": "needsAction"}]
        }));
        assert!(pending.awaiting_response());
        assert!(!accepted.awaiting_response());
        assert!(!other_pending.awaiting_response());
        assert!(!cancelled.awaiting_response());
    }

    #[test]
    fn test_start_date_timed_and_all_day() {
        let timed = event(serde_json::json!({
            "id": "t", "start": {"dateTime": "2025-03-04T09:30:00-05:00"}
        }));
        let all_day = event(serde_json::json!({"id": "a", "start": {"date": "2025-03-05"}}));
        assert_eq!(timed.start_date(), NaiveDate::from_ymd_opt(2025, 3, 4));
        assert_eq!(all_day.start_date(), NaiveDate::from_ymd_opt(2025, 3, 5));
    }

    #[tokio::test]
    async fn test_events_to_items() {
        let key = IntegrationKey::new(ProviderType::Calendar, "work");
        let events = vec![event(serde_json::json!({
            "id": "evt-9",
            "summary": "Quarterly review",
            "start": {"date": "2025-03-05"},
            "organizer": {"email": "boss@example.com"},
            "attendees": [{"self": true, "responseStatus": "needsAction"}]
        }))];
        let items = events_to_items(&HeuristicExtractor, &key, &events)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.title, "Respond to invite: Quarterly review");
        assert_eq!(item.due_date, NaiveDate::from_ymd_opt(2025, 3, 5));
        assert_eq!(item.key(), key);
        assert_eq!(item.metadata["sender"], "boss@example.com");
    }
}
