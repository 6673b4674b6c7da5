//! Google API adapters (Gmail, Calendar) and per-account OAuth sessions.
//!
//! Each adapter owns a [`GoogleSession`]: the account's token file, a cached
//! token, and its own HTTP client. Refreshes are serialized per session, so
//! two accounts never contend over one token file and one account never
//! refreshes twice concurrently.
//!
//! Modules:
//! - gmail: unread mail → actionable items
//! - calendar: pending invitations → actionable items

pub mod calendar;
pub mod gmail;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::CredentialStore;
use crate::error::AdapterError;
use crate::types::{FailureKind, IntegrationKey, PollOutcome};

// ============================================================================
// Token types
// ============================================================================

/// OAuth2 token payload persisted per account.
///
/// Both `token` and `access_token` are accepted on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    #[serde(alias = "access_token")]
    pub token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Token expiry time (RFC 3339)
    #[serde(default)]
    pub expiry: Option<String>,
    /// Authenticated user email
    #[serde(default, alias = "email")]
    pub account: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Token not found at {}", .0.display())]
    TokenNotFound(PathBuf),
    #[error("Token unreadable: {0}")]
    TokenUnreadable(String),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl GoogleApiError {
    /// Map to the poll failure classes. Anything not clearly transient or
    /// auth-related is `Unknown` and gets retried like a transient failure.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            GoogleApiError::AuthExpired | GoogleApiError::TokenNotFound(_) => {
                FailureKind::AuthExpired
            }
            GoogleApiError::Http(e) if e.is_timeout() || e.is_connect() => FailureKind::Transient,
            GoogleApiError::ApiError { status, .. } => classify_status(*status),
            GoogleApiError::RefreshFailed(_) => FailureKind::Transient,
            _ => FailureKind::Unknown,
        }
    }

    pub fn into_outcome(self) -> PollOutcome {
        AdapterError::from(self).into()
    }
}

impl From<GoogleApiError> for AdapterError {
    fn from(err: GoogleApiError) -> Self {
        AdapterError::classified(err.failure_kind(), err.to_string())
    }
}

/// Classify an HTTP status from a provider API.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        401 => FailureKind::AuthExpired,
        408 | 429 => FailureKind::Transient,
        s if s >= 500 => FailureKind::Transient,
        _ => FailureKind::Unknown,
    }
}

/// Turn a non-success response into an error, reading the body for context.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, GoogleApiError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(GoogleApiError::AuthExpired);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GoogleApiError::ApiError {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(resp)
}

// ============================================================================
// Token expiry
// ============================================================================

/// Check if a token is expired (or within 60 seconds of expiring).
pub fn is_token_expired(token: &GoogleToken) -> bool {
    match &token.expiry {
        None => true,
        Some(expiry_str) => match chrono::DateTime::parse_from_rfc3339(expiry_str) {
            Ok(expiry) => expiry <= chrono::Utc::now() + chrono::Duration::seconds(60),
            Err(_) => true,
        },
    }
}

fn map_refresh_error(status: u16, body: &str) -> GoogleApiError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
    {
        return GoogleApiError::AuthExpired;
    }
    if status == 408 || status == 429 || status >= 500 {
        return GoogleApiError::RefreshFailed(format!("HTTP {}: {}", status, body));
    }
    GoogleApiError::ApiError {
        status,
        message: body.to_string(),
    }
}

// ============================================================================
// Session
// ============================================================================

/// One account's OAuth state. Never shared between adapters.
pub struct GoogleSession {
    key: IntegrationKey,
    token_path: PathBuf,
    store: CredentialStore,
    client: reqwest::Client,
    /// Cached token; the lock also serializes refreshes for this account.
    token: Mutex<Option<GoogleToken>>,
}

impl GoogleSession {
    pub fn new(
        key: IntegrationKey,
        token_path: PathBuf,
        store: CredentialStore,
        client: reqwest::Client,
    ) -> Self {
        Self {
            key,
            token_path,
            store,
            client,
            token: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &IntegrationKey {
        &self.key
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn load_token(&self) -> Result<GoogleToken, GoogleApiError> {
        if !self.token_path.exists() {
            return Err(GoogleApiError::TokenNotFound(self.token_path.clone()));
        }
        CredentialStore::load_json(&self.token_path)
            .map_err(|e| GoogleApiError::TokenUnreadable(e.to_string()))
    }

    /// Access token for read-only connection checks. Never refreshes or writes.
    pub async fn current_access_token(&self) -> Result<String, GoogleApiError> {
        let cached = self.token.lock().await.clone();
        let token = match cached {
            Some(t) => t,
            None => self.load_token()?,
        };
        if is_token_expired(&token) {
            return Err(GoogleApiError::AuthExpired);
        }
        Ok(token.token)
    }

    /// Get a valid access token, refreshing and persisting it if expired.
    ///
    /// A failed save is logged with its remediation hint; the refreshed token
    /// stays cached in memory so the current poll still succeeds.
    pub async fn access_token(&self) -> Result<String, GoogleApiError> {
        let mut guard = self.token.lock().await;
        let token = match guard.take() {
            Some(t) => t,
            None => self.load_token()?,
        };

        if !is_token_expired(&token) {
            let access = token.token.clone();
            *guard = Some(token);
            return Ok(access);
        }

        let refreshed = match self.refresh(&token).await {
            Ok(t) => t,
            Err(e) => {
                *guard = Some(token);
                return Err(e);
            }
        };
        if let Err(e) = self.store.save_json(&self.key, &self.token_path, &refreshed) {
            log::error!("Google: {}. {}", e, e.remediation());
        }
        let access = refreshed.token.clone();
        *guard = Some(refreshed);
        Ok(access)
    }

    async fn refresh(&self, token: &GoogleToken) -> Result<GoogleToken, GoogleApiError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(GoogleApiError::AuthExpired)?;

        let mut form = vec![
            ("client_id", token.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = token.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let resp = self
            .client
            .post(&token.token_uri)
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_refresh_error(status.as_u16(), &body));
        }

        let body: serde_json::Value = serde_json::from_str(&body)?;
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| GoogleApiError::RefreshFailed("No access_token in response".into()))?;
        let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
        let expiry = chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64);

        let mut new_token = token.clone();
        new_token.token = access_token.to_string();
        new_token.expiry = Some(expiry.to_rfc3339());
        log::debug!("Google: refreshed access token for {}", self.key);
        Ok(new_token)
    }
}
