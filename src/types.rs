//! Core domain types shared by the registry, poller and ingestion path.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Provider identity
// =============================================================================

/// External provider kinds with an adapter implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Gmail,
    Calendar,
    Linear,
}

impl ProviderType {
    pub const ALL: [ProviderType; 3] = [
        ProviderType::Gmail,
        ProviderType::Calendar,
        ProviderType::Linear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Gmail => "gmail",
            ProviderType::Calendar => "calendar",
            ProviderType::Linear => "linear",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identity of one configured connection.
///
/// The only key used for registry lookups, degraded flags and status
/// reporting. Displays as `provider:account` (e.g. `gmail:work`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationKey {
    pub provider_type: ProviderType,
    pub account_id: String,
}

impl IntegrationKey {
    pub fn new(provider_type: ProviderType, account_id: impl Into<String>) -> Self {
        Self {
            provider_type,
            account_id: account_id.into(),
        }
    }
}

impl fmt::Display for IntegrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider_type, self.account_id)
    }
}

// =============================================================================
// Account configuration
// =============================================================================

/// One configured account, as read from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    pub provider: ProviderType,
    pub account_id: String,
    /// Credential locator: a file name under the credentials directory, or an
    /// absolute path.
    pub credential: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Provider-specific knobs (e.g. a Gmail search query).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl AccountConfig {
    pub fn new(provider: ProviderType, account_id: &str, credential: &str) -> Self {
        Self {
            provider,
            account_id: account_id.to_string(),
            credential: credential.to_string(),
            enabled: true,
            options: serde_json::Map::new(),
        }
    }

    pub fn key(&self) -> IntegrationKey {
        IntegrationKey::new(self.provider, self.account_id.trim())
    }

    /// Read a string option, ignoring blanks.
    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.options
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

// =============================================================================
// Actionable items
// =============================================================================

/// Priority hint supplied by the provider or the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityHint {
    High,
    Normal,
    Low,
}

/// A normalized external signal eligible for conversion into a task.
///
/// Identity (`provider_type`, `account_id`) is always a typed field, never a
/// metadata entry. Items are produced by adapters and consumed by ingestion;
/// they are not persisted themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionableItem {
    pub provider_type: ProviderType,
    pub account_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority_hint: Option<PriorityHint>,
    /// Stable id of the external object, unique within (provider, account).
    pub source_reference: String,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ActionableItem {
    /// Start an item owned by `key`. The key is the only way to set identity.
    pub fn new(key: &IntegrationKey, source_reference: &str, title: &str) -> Self {
        Self {
            provider_type: key.provider_type,
            account_id: key.account_id.clone(),
            title: title.to_string(),
            description: None,
            priority_hint: None,
            source_reference: source_reference.to_string(),
            due_date: None,
            received_at: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn key(&self) -> IntegrationKey {
        IntegrationKey::new(self.provider_type, self.account_id.clone())
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn with_priority_hint(mut self, hint: Option<PriorityHint>) -> Self {
        self.priority_hint = hint;
        self
    }

    pub fn with_due_date(mut self, due_date: Option<NaiveDate>) -> Self {
        self.due_date = due_date;
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn with_metadata(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(name.to_string(), value.into());
        self
    }
}

// =============================================================================
// Poll outcomes
// =============================================================================

/// Classification of a failed poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Transient,
    AuthExpired,
    Unknown,
}

impl FailureKind {
    /// Only expired authorization takes an account out of rotation. Unknown
    /// failures are retried like transient ones.
    pub fn degrades_account(&self) -> bool {
        matches!(self, FailureKind::AuthExpired)
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            FailureKind::AuthExpired => "Re-authenticate this account to resume polling.",
            FailureKind::Transient => "No action needed. The account is retried on the next poll cycle.",
            FailureKind::Unknown => {
                "The account is retried on the next poll cycle. Check the logs if this persists."
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Transient => "transient",
            FailureKind::AuthExpired => "auth-expired",
            FailureKind::Unknown => "unknown",
        })
    }
}

/// Result of polling one account once.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Success(Vec<ActionableItem>),
    Failure { kind: FailureKind, detail: String },
}

impl PollOutcome {
    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        PollOutcome::Failure {
            kind,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_integration_key_display_and_hash() {
        let a = IntegrationKey::new(ProviderType::Gmail, "work");
        let b = IntegrationKey::new(ProviderType::Gmail, "work".to_string());
        let c = IntegrationKey::new(ProviderType::Calendar, "work");
        assert_eq!(a.to_string(), "gmail:work");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut map = HashMap::new();
        map.insert(a.clone(), 1);
        map.insert(c, 2);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn test_item_identity_comes_from_key() {
        let key = IntegrationKey::new(ProviderType::Gmail, "personal");
        let item = ActionableItem::new(&key, "msg-1", "Reply to Sam")
            .with_metadata("from", "sam@example.com");
        assert_eq!(item.account_id, "personal");
        assert_eq!(item.provider_type, ProviderType::Gmail);
        assert_eq!(item.key(), key);
        assert!(!item.metadata.contains_key("account_id"));
    }

    #[test]
    fn test_account_config_deserialize_defaults() {
        let json = r#"{"provider":"gmail","accountId":"work","credential":"work.json"}"#;
        let config: AccountConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert!(config.options.is_empty());
        assert_eq!(config.key(), IntegrationKey::new(ProviderType::Gmail, "work"));
    }

    #[test]
    fn test_only_auth_expired_degrades() {
        assert!(FailureKind::AuthExpired.degrades_account());
        assert!(!FailureKind::Transient.degrades_account());
        assert!(!FailureKind::Unknown.degrades_account());
    }
}
