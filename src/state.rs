use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, PollConfig};
use crate::db::{SqliteTaskStore, TaskDb, TaskStore};
use crate::error::{ConfigError, ReauthError, RegisterError, StartupError};
use crate::extract::HeuristicExtractor;
use crate::integrations::{
    AccountRegistry, AdapterFactory, BuildReport, CredentialStore, DefaultAdapterFactory,
};
use crate::poller::{PollOrchestrator, PollSettings};
use crate::services::integrations::{status_report, IntegrationStatusReport};
use crate::services::tasks::TaskIngestionService;
use crate::types::{AccountConfig, IntegrationKey};
use crate::validation::AccountValidationCache;

/// Everything the daemon shares between the poll loop and its callers.
pub struct AppState {
    config: RwLock<Config>,
    pub registry: Arc<AccountRegistry>,
    pub orchestrator: Arc<PollOrchestrator>,
    pub validation: Arc<AccountValidationCache>,
    pub tasks: Arc<TaskIngestionService>,
    pub credentials: CredentialStore,
    /// Wakes the poll loop for an immediate cycle.
    pub poller_wake: Notify,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Open the task database and register every configured account.
    pub fn new(config: Config) -> Result<Self, StartupError> {
        config.validate()?;
        let db = TaskDb::open_at(config.database_path()?)?;
        let credentials = CredentialStore::new(config.credentials_dir()?);
        let factory = Arc::new(DefaultAdapterFactory::new(
            credentials.clone(),
            Arc::new(HeuristicExtractor),
        ));
        Ok(Self::with_components(
            config,
            factory,
            Arc::new(SqliteTaskStore::new(db)),
            credentials,
        ))
    }

    /// Wire the state from explicit collaborators.
    pub fn with_components(
        config: Config,
        factory: Arc<dyn AdapterFactory>,
        store: Arc<dyn TaskStore>,
        credentials: CredentialStore,
    ) -> Self {
        let (registry, _report) = AccountRegistry::from_config(factory, &config);
        let registry = Arc::new(registry);
        let shutdown = CancellationToken::new();
        let orchestrator = Arc::new(PollOrchestrator::new(
            registry.clone(),
            PollSettings::from(&config.poll),
            shutdown.clone(),
        ));
        let validation = Arc::new(AccountValidationCache::new(registry.clone()));
        let tasks = Arc::new(TaskIngestionService::new(validation.clone(), store));

        Self {
            config: RwLock::new(config),
            registry,
            orchestrator,
            validation,
            tasks,
            credentials,
            poller_wake: Notify::new(),
            shutdown,
        }
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn poll_config(&self) -> PollConfig {
        self.config.read().poll.clone()
    }

    /// Apply a new configuration. The registry moves to a new generation;
    /// a cycle already running finishes against the old one.
    pub fn reload(&self, config: Config) -> Result<BuildReport, ConfigError> {
        config.validate()?;
        let report = self.registry.reload(&config);
        self.orchestrator
            .update_settings(PollSettings::from(&config.poll));
        self.orchestrator.retain_registered();
        *self.config.write() = config;
        Ok(report)
    }

    /// Add an account without a full reload. It is polled from the next cycle.
    pub fn register_account(&self, account: AccountConfig) -> Result<(), RegisterError> {
        self.registry.register(account)?;
        self.request_poll();
        Ok(())
    }

    /// Remove an account and forget any degraded flag it carried, so a later
    /// registration under the same identity starts in rotation.
    pub fn deregister_account(&self, key: &IntegrationKey) -> bool {
        if !self.registry.deregister(key) {
            return false;
        }
        self.orchestrator.clear_degraded(key);
        true
    }

    /// Store a fresh credential for `key`, rebuild its adapter and put it
    /// back into rotation. The next cycle runs right away.
    pub fn reauthenticate(
        &self,
        key: &IntegrationKey,
        credential: &serde_json::Value,
    ) -> Result<(), ReauthError> {
        let snapshot = self.registry.snapshot();
        let account = snapshot
            .account(key)
            .ok_or_else(|| ReauthError::UnknownAccount(key.clone()))?;
        let path = self.credentials.resolve(&account.config.credential);

        self.credentials.save_json(key, &path, credential)?;
        self.registry.rebuild_adapter(key)?;
        self.orchestrator.clear_degraded(key);
        log::info!("State: stored new credential for {}", key);
        self.request_poll();
        Ok(())
    }

    pub fn request_poll(&self) {
        self.poller_wake.notify_one();
    }

    /// Cancel in-flight polls and stop the poll loop.
    pub fn shutdown(&self) {
        log::info!("State: shutdown requested");
        self.shutdown.cancel();
    }

    pub async fn status(&self, check_reachability: bool) -> IntegrationStatusReport {
        status_report(&self.registry, &self.orchestrator, check_reachability).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::error::PollError;
    use crate::integrations::test_utils::{StubAdapter, StubFactory};
    use crate::types::{FailureKind, ProviderType};

    fn gmail(id: &str) -> IntegrationKey {
        IntegrationKey::new(ProviderType::Gmail, id)
    }

    fn config(ids: &[&str]) -> Config {
        Config {
            accounts: ids
                .iter()
                .map(|id| AccountConfig::new(ProviderType::Gmail, id, &format!("{id}.json")))
                .collect(),
            ..Default::default()
        }
    }

    fn state_with(factory: Arc<StubFactory>, config: Config) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::with_components(
            config,
            factory,
            Arc::new(SqliteTaskStore::new(test_db())),
            CredentialStore::new(dir.path().join("credentials")),
        );
        (state, dir)
    }

    #[tokio::test]
    async fn test_reload_changes_valid_accounts() {
        let (state, _dir) = state_with(Arc::new(StubFactory::new()), config(&["work"]));
        assert!(state.validation.is_valid("work").await);

        let report = state.reload(config(&["personal"])).unwrap();
        assert_eq!(report.generation, 2);
        assert!(!state.validation.is_valid("work").await);
        assert!(state.validation.is_valid("personal").await);
        assert_eq!(state.config().accounts.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_rejects_invalid_config() {
        let (state, _dir) = state_with(Arc::new(StubFactory::new()), config(&["work"]));
        let mut bad = config(&["personal"]);
        bad.poll.worker_pool_size = 0;

        assert!(state.reload(bad).is_err());
        assert_eq!(state.registry.generation(), 1);
        assert!(state.validation.is_valid("work").await);
    }

    #[tokio::test]
    async fn test_reauthenticate_persists_and_clears_degraded() {
        let factory = Arc::new(StubFactory::new());
        factory.insert(StubAdapter::new(gmail("work")).failing_with(FailureKind::AuthExpired));
        let (state, dir) = state_with(factory.clone(), config(&["work"]));

        state.orchestrator.run_cycle().await.unwrap();
        assert!(state.orchestrator.is_degraded(&gmail("work")));

        factory.insert(StubAdapter::new(gmail("work")).succeeding_with(1));
        let token = serde_json::json!({"token": "fresh", "refresh_token": "r"});
        state.reauthenticate(&gmail("work"), &token).unwrap();

        assert!(!state.orchestrator.is_degraded(&gmail("work")));
        let saved: serde_json::Value =
            CredentialStore::load_json(&dir.path().join("credentials").join("work.json")).unwrap();
        assert_eq!(saved["token"], "fresh");

        let cycle = state.orchestrator.run_cycle().await.unwrap();
        assert_eq!(cycle.items.len(), 1);
    }

    #[tokio::test]
    async fn test_reregistered_account_starts_in_rotation() {
        let factory = Arc::new(StubFactory::new());
        factory.insert(StubAdapter::new(gmail("work")).failing_with(FailureKind::AuthExpired));
        let (state, _dir) = state_with(factory.clone(), config(&["work"]));

        state.orchestrator.run_cycle().await.unwrap();
        assert!(state.orchestrator.is_degraded(&gmail("work")));

        assert!(state.deregister_account(&gmail("work")));
        assert!(!state.orchestrator.is_degraded(&gmail("work")));
        assert!(!state.deregister_account(&gmail("work")));

        factory.insert(StubAdapter::new(gmail("work")).succeeding_with(2));
        state
            .register_account(AccountConfig::new(ProviderType::Gmail, "work", "work.json"))
            .unwrap();
        assert!(!state.orchestrator.is_degraded(&gmail("work")));
        assert!(state.validation.is_valid("work").await);

        let cycle = state.orchestrator.run_cycle().await.unwrap();
        assert_eq!(cycle.items.len(), 2);
    }

    #[tokio::test]
    async fn test_reauthenticate_unknown_account() {
        let (state, _dir) = state_with(Arc::new(StubFactory::new()), config(&["work"]));
        let err = state
            .reauthenticate(&gmail("ghost"), &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, ReauthError::UnknownAccount(_)));
    }

    #[tokio::test]
    async fn test_shutdown_stops_new_cycles() {
        let (state, _dir) = state_with(Arc::new(StubFactory::new()), config(&["work"]));
        state.shutdown();
        assert_eq!(
            state.orchestrator.run_cycle().await.unwrap_err(),
            PollError::ShuttingDown
        );
    }

    #[tokio::test]
    async fn test_status_lists_registered_accounts() {
        let (state, _dir) = state_with(Arc::new(StubFactory::new()), config(&["work", "personal"]));
        let report = state.status(true).await;
        assert_eq!(report.accounts.len(), 2);
        assert!(report.accounts.iter().all(|a| a.reachable == Some(true)));
    }
}
