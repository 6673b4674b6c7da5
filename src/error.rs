//! Error types for account registration, polling and task ingestion
//!
//! Errors are classified by recoverability:
//! - Retryable: transient adapter failures (retried on the next cycle)
//! - NonRetryable: duplicate accounts, unknown accounts, bad items
//! - RequiresUserAction: expired authorization, credential persistence

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{FailureKind, IntegrationKey, PollOutcome};

/// A second account configuration claimed an identity that is already registered.
///
/// Non-fatal: the first registration wins and the duplicate is skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Duplicate account {key}: already registered, keeping the first entry")]
pub struct DuplicateAccountError {
    pub key: IntegrationKey,
}

/// Task creation referenced an account that is not currently registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Account not found: '{account_id}' (configured accounts: {})", format_accounts(.valid_accounts))]
pub struct AccountNotFoundError {
    pub account_id: String,
    pub valid_accounts: Vec<String>,
}

fn format_accounts(accounts: &[String]) -> String {
    if accounts.is_empty() {
        "none".to_string()
    } else {
        accounts.join(", ")
    }
}

/// Saving a refreshed credential to disk failed.
#[derive(Debug, Error)]
#[error("Failed to persist credential for {key} at {}: {source}", .path.display())]
pub struct CredentialPersistError {
    pub key: IntegrationKey,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl CredentialPersistError {
    pub fn remediation(&self) -> String {
        match self.path.parent() {
            Some(dir) => format!(
                "Check that {} exists, is owned by you and is writable (mode 0700), and that the disk is not full.",
                dir.display()
            ),
            None => "Check the credentials directory permissions and free disk space.".to_string(),
        }
    }
}

/// Errors raised by integration adapters. Converted to a classified
/// `PollOutcome::Failure` before they reach the orchestrator.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Authorization expired: {0}")]
    Auth(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Adapter failure: {0}")]
    Unknown(String),
}

impl AdapterError {
    pub fn classified(kind: FailureKind, detail: String) -> Self {
        match kind {
            FailureKind::AuthExpired => AdapterError::Auth(detail),
            FailureKind::Transient => AdapterError::Transient(detail),
            FailureKind::Unknown => AdapterError::Unknown(detail),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            AdapterError::Auth(_) => FailureKind::AuthExpired,
            AdapterError::Transient(_) => FailureKind::Transient,
            AdapterError::Unknown(_) => FailureKind::Unknown,
        }
    }

    /// Retried on the next cycle without operator involvement.
    pub fn is_retryable(&self) -> bool {
        !self.requires_user_action()
    }

    /// The account leaves rotation until it is re-authenticated.
    pub fn requires_user_action(&self) -> bool {
        self.kind().degrades_account()
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        self.kind().recovery_suggestion()
    }
}

impl From<AdapterError> for PollOutcome {
    fn from(err: AdapterError) -> Self {
        PollOutcome::failure(err.kind(), err.to_string())
    }
}

impl From<crate::extract::ExtractError> for AdapterError {
    fn from(err: crate::extract::ExtractError) -> Self {
        AdapterError::Transient(err.to_string())
    }
}

/// Adapter construction failed; the account is not registered.
#[derive(Debug, Error)]
pub enum AdapterInitError {
    #[error("Invalid account id '{account_id}': {reason}")]
    InvalidAccountId { account_id: String, reason: String },

    #[error("Credential not readable at {}: {reason}", .path.display())]
    Credential { path: PathBuf, reason: String },

    #[error("HTTP client: {0}")]
    Http(String),
}

/// Why a configuration entry did not produce a registered account.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateAccountError),

    #[error("Failed to initialize adapter for {key}: {source}")]
    AdapterInit {
        key: IntegrationKey,
        #[source]
        source: AdapterInitError,
    },

    #[error("Provider {} is disabled; {key} was not registered", key.provider_type)]
    ProviderDisabled { key: IntegrationKey },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Config not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Poll cycle could not start.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("A poll cycle is already running")]
    CycleInProgress,

    #[error("Poller is shutting down")]
    ShuttingDown,
}

/// Errors from task creation and ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    AccountNotFound(#[from] AccountNotFoundError),

    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::db::DbError),
}

impl IngestError {
    /// Validation failures are synchronous and carry no persistence side effect.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IngestError::AccountNotFound(_) | IngestError::InvalidItem(_)
        )
    }
}

/// Storing a fresh credential for an account failed.
#[derive(Debug, Error)]
pub enum ReauthError {
    #[error("Account {0} is not registered")]
    UnknownAccount(IntegrationKey),

    #[error(transparent)]
    Persist(#[from] CredentialPersistError),

    #[error(transparent)]
    Rebuild(#[from] RegisterError),
}

/// The daemon could not start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open task database: {0}")]
    Storage(#[from] crate::db::DbError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderType;

    #[test]
    fn test_account_not_found_lists_accounts() {
        let err = AccountNotFoundError {
            account_id: "ghost".to_string(),
            valid_accounts: vec!["personal".to_string(), "work".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("ghost"));
        assert!(msg.contains("personal, work"));
    }

    #[test]
    fn test_account_not_found_without_accounts() {
        let err = AccountNotFoundError {
            account_id: "ghost".to_string(),
            valid_accounts: vec![],
        };
        assert!(err.to_string().contains("configured accounts: none"));
    }

    #[test]
    fn test_adapter_error_classification() {
        assert_eq!(AdapterError::Auth("x".into()).kind(), FailureKind::AuthExpired);
        assert_eq!(AdapterError::Transient("x".into()).kind(), FailureKind::Transient);
        assert_eq!(AdapterError::Unknown("x".into()).kind(), FailureKind::Unknown);
        assert!(AdapterError::Unknown("x".into()).is_retryable());
        assert!(!AdapterError::Auth("x".into()).is_retryable());
        assert!(AdapterError::Auth("x".into()).requires_user_action());
    }

    #[test]
    fn test_adapter_error_becomes_classified_failure() {
        let outcome: PollOutcome = AdapterError::classified(FailureKind::AuthExpired, "revoked".into()).into();
        match outcome {
            PollOutcome::Failure { kind, detail } => {
                assert_eq!(kind, FailureKind::AuthExpired);
                assert!(detail.contains("revoked"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_credential_persist_remediation_names_directory() {
        let err = CredentialPersistError {
            key: IntegrationKey::new(ProviderType::Gmail, "work"),
            path: PathBuf::from("/tmp/creds/work.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.remediation().contains("/tmp/creds"));
        assert!(err.to_string().contains("gmail:work"));
    }
}
