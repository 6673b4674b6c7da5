//! Account registry keyed by `IntegrationKey`.
//!
//! The registry publishes an immutable [`RegistrySnapshot`] per generation.
//! Readers clone the `Arc` and keep using it for as long as they need; writers
//! (register, deregister, reload) build a complete replacement off to the side
//! and swap it in with the generation bumped, so nobody ever sees a half-built
//! registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::{AdapterFactory, IntegrationAdapter};
use crate::config::{Config, ProviderEnablement};
use crate::error::{AdapterInitError, DuplicateAccountError, RegisterError};
use crate::types::{AccountConfig, IntegrationKey, ProviderType};
use crate::util::validate_id_slug;

/// One successfully registered account and its adapter.
pub struct RegisteredAccount {
    pub key: IntegrationKey,
    pub config: AccountConfig,
    pub adapter: Arc<dyn IntegrationAdapter>,
}

/// Health of a provider type as seen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ProviderHealth {
    /// Turned off in config; its accounts are skipped on purpose.
    Disabled,
    /// Not mentioned anywhere in config.
    Unconfigured,
    Active { accounts: usize },
    /// Enabled, but not a single account registered. Needs operator attention.
    NoAccounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider: ProviderType,
    pub health: ProviderHealth,
}

/// What happened to each config entry during a build or reload.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub generation: u64,
    pub registered: Vec<IntegrationKey>,
    pub duplicates: Vec<DuplicateAccountError>,
    pub failed: Vec<(IntegrationKey, String)>,
    pub skipped: Vec<IntegrationKey>,
    pub providers: Vec<ProviderStatus>,
}

impl BuildReport {
    /// Enabled provider types that ended up with no registered account.
    pub fn providers_without_accounts(&self) -> Vec<ProviderType> {
        self.providers
            .iter()
            .filter(|p| p.health == ProviderHealth::NoAccounts)
            .map(|p| p.provider)
            .collect()
    }
}

/// Immutable view of the registry for one generation.
pub struct RegistrySnapshot {
    generation: u64,
    accounts: Vec<Arc<RegisteredAccount>>,
    index: HashMap<IntegrationKey, usize>,
    enablement: HashMap<ProviderType, ProviderEnablement>,
}

impl RegistrySnapshot {
    fn empty() -> Self {
        Self {
            generation: 0,
            accounts: Vec::new(),
            index: HashMap::new(),
            enablement: HashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// All registered accounts in registration order.
    pub fn accounts(&self) -> &[Arc<RegisteredAccount>] {
        &self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn contains(&self, key: &IntegrationKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn lookup(&self, key: &IntegrationKey) -> Option<Arc<dyn IntegrationAdapter>> {
        self.account(key).map(|a| a.adapter.clone())
    }

    pub fn account(&self, key: &IntegrationKey) -> Option<&Arc<RegisteredAccount>> {
        self.index.get(key).and_then(|&i| self.accounts.get(i))
    }

    /// Account ids of one provider type, in registration order.
    pub fn list_accounts(&self, provider: ProviderType) -> Vec<String> {
        self.accounts
            .iter()
            .filter(|a| a.key.provider_type == provider)
            .map(|a| a.key.account_id.clone())
            .collect()
    }

    pub fn provider_health(&self, provider: ProviderType) -> ProviderHealth {
        let count = self
            .accounts
            .iter()
            .filter(|a| a.key.provider_type == provider)
            .count();
        let enablement = self
            .enablement
            .get(&provider)
            .copied()
            .unwrap_or(ProviderEnablement::Unconfigured);
        match (enablement, count) {
            (ProviderEnablement::Disabled, _) => ProviderHealth::Disabled,
            (_, n) if n > 0 => ProviderHealth::Active { accounts: n },
            (ProviderEnablement::Enabled, _) => ProviderHealth::NoAccounts,
            (ProviderEnablement::Unconfigured, _) => ProviderHealth::Unconfigured,
        }
    }

    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        ProviderType::ALL
            .iter()
            .map(|&provider| ProviderStatus {
                provider,
                health: self.provider_health(provider),
            })
            .collect()
    }
}

/// Accumulates one generation's accounts in config order.
struct SnapshotBuilder<'a> {
    factory: &'a dyn AdapterFactory,
    accounts: Vec<Arc<RegisteredAccount>>,
    index: HashMap<IntegrationKey, usize>,
}

impl<'a> SnapshotBuilder<'a> {
    fn new(factory: &'a dyn AdapterFactory) -> Self {
        Self {
            factory,
            accounts: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn from_snapshot(factory: &'a dyn AdapterFactory, snapshot: &RegistrySnapshot) -> Self {
        Self {
            factory,
            accounts: snapshot.accounts.clone(),
            index: snapshot.index.clone(),
        }
    }

    /// Duplicate check first, adapter construction second.
    fn register(&mut self, config: &AccountConfig) -> Result<IntegrationKey, RegisterError> {
        let key = config.key();
        validate_id_slug(&config.account_id, "account_id").map_err(|reason| {
            RegisterError::AdapterInit {
                key: key.clone(),
                source: AdapterInitError::InvalidAccountId {
                    account_id: config.account_id.clone(),
                    reason,
                },
            }
        })?;

        if self.index.contains_key(&key) {
            return Err(DuplicateAccountError { key }.into());
        }

        let adapter = self
            .factory
            .create(config)
            .map_err(|source| RegisterError::AdapterInit {
                key: key.clone(),
                source,
            })?;

        let mut config = config.clone();
        config.account_id = key.account_id.clone();
        self.index.insert(key.clone(), self.accounts.len());
        self.accounts.push(Arc::new(RegisteredAccount {
            key: key.clone(),
            config,
            adapter,
        }));
        Ok(key)
    }

    fn finish(
        self,
        generation: u64,
        enablement: HashMap<ProviderType, ProviderEnablement>,
    ) -> RegistrySnapshot {
        RegistrySnapshot {
            generation,
            accounts: self.accounts,
            index: self.index,
            enablement,
        }
    }
}

/// Registry of configured accounts. Construct once and share by `Arc`.
pub struct AccountRegistry {
    factory: Arc<dyn AdapterFactory>,
    current: RwLock<Arc<RegistrySnapshot>>,
    /// Serializes writers so generations are assigned in order.
    writer: Mutex<()>,
}

impl AccountRegistry {
    /// Empty registry at generation 0.
    pub fn new(factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            factory,
            current: RwLock::new(Arc::new(RegistrySnapshot::empty())),
            writer: Mutex::new(()),
        }
    }

    /// Build a registry from config. The first snapshot is generation 1.
    pub fn from_config(factory: Arc<dyn AdapterFactory>, config: &Config) -> (Self, BuildReport) {
        let registry = Self::new(factory);
        let report = registry.reload(config);
        (registry, report)
    }

    /// The current snapshot. Cheap; safe to hold across awaits.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    pub fn list_accounts(&self, provider: ProviderType) -> Vec<String> {
        self.snapshot().list_accounts(provider)
    }

    pub fn lookup(&self, key: &IntegrationKey) -> Option<Arc<dyn IntegrationAdapter>> {
        self.snapshot().lookup(key)
    }

    /// Register one more account on top of the current generation.
    ///
    /// A provider switched off in config stays off: its accounts are
    /// rejected rather than polled behind a `Disabled` health report.
    pub fn register(&self, config: AccountConfig) -> Result<(), RegisterError> {
        let _writer = self.writer.lock();
        let current = self.snapshot();
        if current.enablement.get(&config.provider) == Some(&ProviderEnablement::Disabled) {
            return Err(RegisterError::ProviderDisabled { key: config.key() });
        }
        let mut builder = SnapshotBuilder::from_snapshot(self.factory.as_ref(), &current);
        let key = builder.register(&config)?;

        let mut enablement = current.enablement.clone();
        enablement
            .entry(key.provider_type)
            .and_modify(|e| {
                if *e == ProviderEnablement::Unconfigured {
                    *e = ProviderEnablement::Enabled;
                }
            })
            .or_insert(ProviderEnablement::Enabled);

        let next = builder.finish(current.generation + 1, enablement);
        log::info!("Registry: registered {} (generation {})", key, next.generation);
        *self.current.write() = Arc::new(next);
        Ok(())
    }

    /// Remove an account. Its adapter is dropped once in-flight readers finish.
    pub fn deregister(&self, key: &IntegrationKey) -> bool {
        let _writer = self.writer.lock();
        let current = self.snapshot();
        if !current.contains(key) {
            return false;
        }
        let accounts: Vec<Arc<RegisteredAccount>> = current
            .accounts
            .iter()
            .filter(|a| &a.key != key)
            .cloned()
            .collect();
        let index = accounts
            .iter()
            .enumerate()
            .map(|(i, a)| (a.key.clone(), i))
            .collect();
        let next = RegistrySnapshot {
            generation: current.generation + 1,
            accounts,
            index,
            enablement: current.enablement.clone(),
        };
        log::info!("Registry: deregistered {} (generation {})", key, next.generation);
        *self.current.write() = Arc::new(next);
        true
    }

    /// Replace an account's adapter with a freshly constructed one, keeping
    /// its position. Used after re-authentication so no stale token survives.
    ///
    /// Returns `Ok(false)` if the account is not registered.
    pub fn rebuild_adapter(&self, key: &IntegrationKey) -> Result<bool, RegisterError> {
        let _writer = self.writer.lock();
        let current = self.snapshot();
        let Some(&position) = current.index.get(key) else {
            return Ok(false);
        };
        let existing = &current.accounts[position];
        let adapter = self
            .factory
            .create(&existing.config)
            .map_err(|source| RegisterError::AdapterInit {
                key: key.clone(),
                source,
            })?;

        let mut accounts = current.accounts.clone();
        accounts[position] = Arc::new(RegisteredAccount {
            key: key.clone(),
            config: existing.config.clone(),
            adapter,
        });
        let next = RegistrySnapshot {
            generation: current.generation + 1,
            accounts,
            index: current.index.clone(),
            enablement: current.enablement.clone(),
        };
        log::info!("Registry: rebuilt adapter for {} (generation {})", key, next.generation);
        *self.current.write() = Arc::new(next);
        Ok(true)
    }

    /// Rebuild the registry from config and swap it in atomically.
    ///
    /// Entries are processed in config order. A duplicate identity keeps the
    /// first entry and skips the later one; a failing entry never stops the
    /// rest from registering.
    pub fn reload(&self, config: &Config) -> BuildReport {
        let _writer = self.writer.lock();
        let mut report = BuildReport::default();
        let mut builder = SnapshotBuilder::new(self.factory.as_ref());

        let enablement: HashMap<ProviderType, ProviderEnablement> = ProviderType::ALL
            .iter()
            .map(|&p| (p, config.provider_enablement(p)))
            .collect();

        for account in &config.accounts {
            let key = account.key();
            if !account.enabled {
                log::debug!("Registry: {} is disabled, skipping", key);
                report.skipped.push(key);
                continue;
            }
            if enablement.get(&account.provider) == Some(&ProviderEnablement::Disabled) {
                log::debug!(
                    "Registry: provider {} is disabled, skipping {}",
                    account.provider,
                    key
                );
                report.skipped.push(key);
                continue;
            }
            match builder.register(account) {
                Ok(key) => report.registered.push(key),
                Err(RegisterError::Duplicate(dup)) => {
                    log::warn!("Registry: {}", dup);
                    report.duplicates.push(dup);
                }
                Err(RegisterError::AdapterInit { key, source }) => {
                    log::warn!("Registry: failed to initialize {}: {}", key, source);
                    report.failed.push((key, source.to_string()));
                }
                Err(RegisterError::ProviderDisabled { key }) => report.skipped.push(key),
            }
        }

        let generation = self.generation() + 1;
        let next = builder.finish(generation, enablement);
        report.generation = generation;
        report.providers = next.provider_statuses();

        for provider in report.providers_without_accounts() {
            log::warn!(
                "Registry: provider {} is enabled but has no successfully registered accounts",
                provider
            );
        }
        log::info!(
            "Registry: generation {} with {} accounts ({} duplicates, {} failed, {} skipped)",
            generation,
            next.len(),
            report.duplicates.len(),
            report.failed.len(),
            report.skipped.len()
        );

        *self.current.write() = Arc::new(next);
        report
    }
}
