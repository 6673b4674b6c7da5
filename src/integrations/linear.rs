//! Linear adapter: open issues assigned to the account's user.
//!
//! GraphQL over reqwest with the personal API key as the `Authorization`
//! header. The key is read from the account's credential file on every poll,
//! so re-authentication only has to replace the file.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use super::google::classify_status;
use super::IntegrationAdapter;
use crate::error::AdapterError;
use crate::extract::{build_item, Extractor, RawSignal};
use crate::types::{FailureKind, IntegrationKey, PollOutcome, PriorityHint};

const LINEAR_API_URL: &str = "https://api.linear.app/graphql";

const ASSIGNED_ISSUES_QUERY: &str = r#"{
    viewer {
        assignedIssues(
            filter: { state: { type: { nin: ["completed", "cancelled"] } } }
            first: 100
            orderBy: updatedAt
        ) {
            nodes {
                id identifier title description
                priority dueDate url createdAt
            }
        }
    }
}"#;

#[derive(Debug, thiserror::Error)]
enum LinearError {
    #[error("API key unavailable at {}: {reason}", .path.display())]
    MissingKey { path: PathBuf, reason: String },
    #[error("Linear API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Linear API error {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Linear GraphQL errors: {0}")]
    GraphQl(String),
    #[error("Failed to parse Linear response: {0}")]
    Parse(String),
}

impl LinearError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            LinearError::MissingKey { .. } => FailureKind::AuthExpired,
            LinearError::Http(e) if e.is_timeout() || e.is_connect() => FailureKind::Transient,
            LinearError::Status { status, .. } => classify_status(*status),
            LinearError::GraphQl(msg) if is_auth_error(msg) => FailureKind::AuthExpired,
            LinearError::GraphQl(msg) if msg.contains("RATELIMITED") => FailureKind::Transient,
            _ => FailureKind::Unknown,
        }
    }
}

impl From<LinearError> for AdapterError {
    fn from(err: LinearError) -> Self {
        AdapterError::classified(err.failure_kind(), err.to_string())
    }
}

fn is_auth_error(graphql_errors: &str) -> bool {
    graphql_errors.contains("AUTHENTICATION_ERROR")
        || graphql_errors.to_lowercase().contains("authentication required")
}

/// Credential file: `{"apiKey": "..."}` or the bare key as text.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinearCredential {
    #[serde(alias = "api_key")]
    api_key: String,
}

fn parse_api_key(content: &str) -> Option<String> {
    let trimmed = content.trim();
    let key = if trimmed.starts_with('{') {
        serde_json::from_str::<LinearCredential>(trimmed)
            .ok()?
            .api_key
    } else {
        trimmed.to_string()
    };
    let key = key.trim().to_string();
    (!key.is_empty()).then_some(key)
}

#[derive(Debug, Deserialize)]
struct IssuesResponse {
    viewer: ViewerIssues,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewerIssues {
    assigned_issues: IssueConnection,
}

#[derive(Debug, Deserialize)]
struct IssueConnection {
    nodes: Vec<IssueNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    id: String,
    identifier: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    created_at: Option<String>,
}

/// Linear priorities: 0 none, 1 urgent, 2 high, 3 medium, 4 low.
fn priority_hint(priority: Option<i32>) -> Option<PriorityHint> {
    match priority? {
        1 | 2 => Some(PriorityHint::High),
        3 => Some(PriorityHint::Normal),
        4 => Some(PriorityHint::Low),
        _ => None,
    }
}

impl IssueNode {
    fn to_signal(&self) -> RawSignal {
        RawSignal {
            source_reference: self.id.clone(),
            subject: format!("{} {}", self.identifier, self.title),
            body: self.description.clone().unwrap_or_default(),
            sender: None,
            received_at: self
                .created_at
                .as_deref()
                .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&chrono::Utc)),
            due_date: self
                .due_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            provider_priority: priority_hint(self.priority),
        }
    }
}

pub struct LinearAdapter {
    key: IntegrationKey,
    credential_path: PathBuf,
    client: reqwest::Client,
    extractor: Arc<dyn Extractor>,
}

impl LinearAdapter {
    pub fn new(
        key: IntegrationKey,
        credential_path: PathBuf,
        client: reqwest::Client,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            key,
            credential_path,
            client,
            extractor,
        }
    }

    fn api_key(&self) -> Result<String, LinearError> {
        let missing = |reason: String| LinearError::MissingKey {
            path: self.credential_path.clone(),
            reason,
        };
        let content = std::fs::read_to_string(&self.credential_path)
            .map_err(|e| missing(e.to_string()))?;
        parse_api_key(&content).ok_or_else(|| missing("no API key in file".to_string()))
    }

    async fn graphql<T: serde::de::DeserializeOwned>(&self, query: &str) -> Result<T, LinearError> {
        let api_key = self.api_key()?;
        let resp = self
            .client
            .post(LINEAR_API_URL)
            .header("Authorization", api_key)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LinearError::Status {
                status: status.as_u16(),
                message: text,
            });
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LinearError::Parse(e.to_string()))?;
        if let Some(errors) = json.get("errors") {
            return Err(LinearError::GraphQl(errors.to_string()));
        }
        let data = json
            .get("data")
            .cloned()
            .ok_or_else(|| LinearError::Parse("missing 'data'".to_string()))?;
        serde_json::from_value(data).map_err(|e| LinearError::Parse(e.to_string()))
    }
}

#[async_trait]
impl IntegrationAdapter for LinearAdapter {
    fn key(&self) -> &IntegrationKey {
        &self.key
    }

    async fn poll(&self) -> PollOutcome {
        let resp: IssuesResponse = match self.graphql(ASSIGNED_ISSUES_QUERY).await {
            Ok(r) => r,
            Err(e) => return AdapterError::from(e).into(),
        };

        let mut items = Vec::new();
        for issue in &resp.viewer.assigned_issues.nodes {
            match build_item(self.extractor.as_ref(), &self.key, &issue.to_signal()).await {
                Ok(Some(item)) => items.push(item.with_metadata("url", issue.url.clone())),
                Ok(None) => {}
                Err(e) => return AdapterError::from(e).into(),
            }
        }
        log::debug!("Linear: {} open issues for {}", items.len(), self.key);
        PollOutcome::Success(items)
    }

    async fn test_connection(&self) -> bool {
        match self.graphql::<serde_json::Value>("{ viewer { id } }").await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("Linear: connection test failed for {}: {}", self.key, e);
                false
            }
        }
    }
}
