//! External provider integrations.
//!
//! Each configured account gets its own [`IntegrationAdapter`] instance that
//! owns the account's credential handle and HTTP client. Adapters never share
//! state across accounts.
//!
//! Modules:
//! - registry: accounts keyed by `IntegrationKey`, snapshot per generation
//! - credentials: owner-only, atomic token persistence
//! - google: Gmail and Google Calendar adapters
//! - linear: Linear assigned-issue adapter

pub mod credentials;
pub mod google;
pub mod linear;
pub mod registry;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AdapterInitError;
use crate::extract::Extractor;
use crate::types::{AccountConfig, IntegrationKey, PollOutcome, ProviderType};

pub use credentials::CredentialStore;
pub use registry::{
    AccountRegistry, BuildReport, ProviderHealth, ProviderStatus, RegisteredAccount,
    RegistrySnapshot,
};

/// Timeout applied to every provider HTTP request. The orchestrator's
/// per-account deadline bounds the whole poll on top of this.
const HTTP_TIMEOUT_SECS: u64 = 20;

/// Capability set implemented once per provider type.
///
/// `poll` never fails with an unrecoverable fault: network errors, rate limits
/// and expired authorization come back as a classified
/// `PollOutcome::Failure`. Every item in a `Success` carries this adapter's
/// own key.
#[async_trait]
pub trait IntegrationAdapter: Send + Sync {
    fn key(&self) -> &IntegrationKey;

    async fn poll(&self) -> PollOutcome;

    /// Lightweight reachability check. Never mutates state.
    async fn test_connection(&self) -> bool;
}

/// Builds adapters for registered accounts. Called only after the duplicate
/// check passes, so colliding entries never open a connection.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, config: &AccountConfig)
        -> Result<Arc<dyn IntegrationAdapter>, AdapterInitError>;
}

/// Factory for the real provider adapters.
pub struct DefaultAdapterFactory {
    credentials: CredentialStore,
    extractor: Arc<dyn Extractor>,
}

impl DefaultAdapterFactory {
    pub fn new(credentials: CredentialStore, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            credentials,
            extractor,
        }
    }

    fn http_client() -> Result<reqwest::Client, AdapterInitError> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| AdapterInitError::Http(e.to_string()))
    }
}

impl AdapterFactory for DefaultAdapterFactory {
    fn create(
        &self,
        config: &AccountConfig,
    ) -> Result<Arc<dyn IntegrationAdapter>, AdapterInitError> {
        let key = config.key();
        let credential_path = self.credentials.resolve(&config.credential);
        let client = Self::http_client()?;

        let adapter: Arc<dyn IntegrationAdapter> = match config.provider {
            ProviderType::Gmail => {
                let session = google::GoogleSession::new(
                    key.clone(),
                    credential_path,
                    self.credentials.clone(),
                    client,
                );
                Arc::new(google::gmail::GmailAdapter::new(
                    session,
                    self.extractor.clone(),
                    config.option_str("query"),
                ))
            }
            ProviderType::Calendar => {
                let session = google::GoogleSession::new(
                    key.clone(),
                    credential_path,
                    self.credentials.clone(),
                    client,
                );
                Arc::new(google::calendar::CalendarAdapter::new(
                    session,
                    self.extractor.clone(),
                ))
            }
            ProviderType::Linear => Arc::new(linear::LinearAdapter::new(
                key.clone(),
                credential_path,
                client,
                self.extractor.clone(),
            )),
        };
        log::debug!("Integrations: constructed adapter for {}", key);
        Ok(adapter)
    }
}
