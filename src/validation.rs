//! Memoized set of valid account ids for task ingestion.
//!
//! The set is tagged with the registry generation it was built from. A read
//! against a current set only clones an `Arc`; a stale or missing set is
//! rebuilt under a single-flight lock, so concurrent callers on a cold cache
//! wait for one rebuild instead of each scanning the registry.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::AccountNotFoundError;
use crate::integrations::AccountRegistry;
use crate::types::ProviderType;

/// Where the cache reads account ids from.
pub trait AccountSource: Send + Sync {
    fn generation(&self) -> u64;
    fn list_accounts(&self, provider: ProviderType) -> Vec<String>;
}

impl AccountSource for AccountRegistry {
    fn generation(&self) -> u64 {
        AccountRegistry::generation(self)
    }

    fn list_accounts(&self, provider: ProviderType) -> Vec<String> {
        AccountRegistry::list_accounts(self, provider)
    }
}

#[derive(Debug)]
struct ValidAccounts {
    generation: u64,
    /// Registration order across provider types, deduplicated.
    ordered: Vec<String>,
    ids: HashSet<String>,
}

pub struct AccountValidationCache {
    source: Arc<dyn AccountSource>,
    current: RwLock<Option<Arc<ValidAccounts>>>,
    rebuild_lock: tokio::sync::Mutex<()>,
    rebuilds: AtomicU64,
}

impl AccountValidationCache {
    pub fn new(source: Arc<dyn AccountSource>) -> Self {
        Self {
            source,
            current: RwLock::new(None),
            rebuild_lock: tokio::sync::Mutex::new(()),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// True if `account_id` (trimmed) belongs to any registered account.
    /// Blank ids are never valid.
    pub async fn is_valid(&self, account_id: &str) -> bool {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return false;
        }
        self.current().await.ids.contains(account_id)
    }

    /// Validate, producing the diagnostic error on failure.
    pub async fn check(&self, account_id: &str) -> Result<(), AccountNotFoundError> {
        let accounts = self.current().await;
        let trimmed = account_id.trim();
        if !trimmed.is_empty() && accounts.ids.contains(trimmed) {
            return Ok(());
        }
        Err(AccountNotFoundError {
            account_id: account_id.to_string(),
            valid_accounts: accounts.ordered.clone(),
        })
    }

    /// Number of full rebuilds performed so far.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    fn fresh(&self, generation: u64) -> Option<Arc<ValidAccounts>> {
        self.current
            .read()
            .as_ref()
            .filter(|c| c.generation == generation)
            .cloned()
    }

    async fn current(&self) -> Arc<ValidAccounts> {
        if let Some(accounts) = self.fresh(self.source.generation()) {
            return accounts;
        }

        let _guard = self.rebuild_lock.lock().await;
        // Another caller may have rebuilt while we waited
        let generation = self.source.generation();
        if let Some(accounts) = self.fresh(generation) {
            return accounts;
        }

        let built = Arc::new(self.build(generation));
        *self.current.write() = Some(built.clone());
        built
    }

    /// Generation is read before listing: a registry change mid-build leaves
    /// the set tagged with the older generation and it is rebuilt next call.
    fn build(&self, generation: u64) -> ValidAccounts {
        let mut ordered = Vec::new();
        let mut ids = HashSet::new();
        for provider in ProviderType::ALL {
            for id in self.source.list_accounts(provider) {
                if ids.insert(id.clone()) {
                    ordered.push(id);
                }
            }
        }
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "Validation: rebuilt account set ({} ids, generation {})",
            ordered.len(),
            generation
        );
        ValidAccounts {
            generation,
            ordered,
            ids,
        }
    }
}
