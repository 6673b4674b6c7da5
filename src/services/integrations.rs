//! Operator-facing status: connection checks, degraded accounts and
//! provider health, gathered into one report.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::integrations::{AccountRegistry, ProviderHealth, ProviderStatus};
use crate::poller::{CycleReport, DegradedInfo, OutcomeStatus, PollOrchestrator};
use crate::types::{FailureKind, IntegrationKey};

/// Upper bound for a single connection check.
const CONNECTION_CHECK_SECS: u64 = 15;

/// Check every registered account concurrently.
///
/// An account whose check times out or panics is reported unreachable.
pub async fn test_connections(registry: &AccountRegistry) -> HashMap<IntegrationKey, bool> {
    test_connections_within(registry, Duration::from_secs(CONNECTION_CHECK_SECS)).await
}

pub async fn test_connections_within(
    registry: &AccountRegistry,
    deadline: Duration,
) -> HashMap<IntegrationKey, bool> {
    let snapshot = registry.snapshot();
    let mut results: HashMap<IntegrationKey, bool> = snapshot
        .accounts()
        .iter()
        .map(|a| (a.key.clone(), false))
        .collect();

    let mut checks = JoinSet::new();
    for account in snapshot.accounts() {
        let account = Arc::clone(account);
        checks.spawn(async move {
            let reachable = tokio::time::timeout(deadline, account.adapter.test_connection())
                .await
                .unwrap_or_else(|_| {
                    log::warn!("Status: connection test for {} timed out", account.key);
                    false
                });
            (account.key.clone(), reachable)
        });
    }

    while let Some(joined) = checks.join_next().await {
        match joined {
            Ok((key, reachable)) => {
                results.insert(key, reachable);
            }
            Err(e) => log::error!("Status: connection test task failed: {}", e),
        }
    }
    results
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub key: IntegrationKey,
    /// `None` when the report was built without connection checks.
    pub reachable: Option<bool>,
    pub degraded: Option<DegradedInfo>,
    pub last_outcome: Option<OutcomeStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStatusReport {
    pub generated_at: DateTime<Utc>,
    pub generation: u64,
    pub accounts: Vec<AccountStatus>,
    pub providers: Vec<ProviderStatus>,
    /// Conditions that need the operator: providers with no accounts,
    /// accounts out of rotation.
    pub warnings: Vec<String>,
    pub last_cycle: Option<CycleReport>,
}

impl IntegrationStatusReport {
    pub fn account(&self, key: &IntegrationKey) -> Option<&AccountStatus> {
        self.accounts.iter().find(|a| &a.key == key)
    }
}

/// Build the status report, optionally checking every connection first.
pub async fn status_report(
    registry: &AccountRegistry,
    orchestrator: &PollOrchestrator,
    check_reachability: bool,
) -> IntegrationStatusReport {
    let snapshot = registry.snapshot();
    let reachability = if check_reachability {
        Some(test_connections(registry).await)
    } else {
        None
    };
    let last_cycle = orchestrator.last_report();

    let accounts: Vec<AccountStatus> = snapshot
        .accounts()
        .iter()
        .map(|a| AccountStatus {
            key: a.key.clone(),
            reachable: reachability.as_ref().and_then(|r| r.get(&a.key).copied()),
            degraded: orchestrator.degraded_info(&a.key),
            last_outcome: last_cycle
                .as_ref()
                .and_then(|c| c.outcome(&a.key).cloned()),
        })
        .collect();

    let providers = snapshot.provider_statuses();
    let mut warnings = Vec::new();
    for status in &providers {
        if status.health == ProviderHealth::NoAccounts {
            warnings.push(format!(
                "{} is enabled but has no registered accounts",
                status.provider
            ));
        }
    }
    for account in &accounts {
        if let Some(degraded) = &account.degraded {
            warnings.push(format!(
                "{} is paused since {}: {}. {}",
                account.key,
                degraded.since.format("%Y-%m-%d %H:%M UTC"),
                degraded.reason,
                FailureKind::AuthExpired.recovery_suggestion()
            ));
        }
    }

    IntegrationStatusReport {
        generated_at: Utc::now(),
        generation: snapshot.generation(),
        accounts,
        providers,
        warnings,
        last_cycle: last_cycle.map(|c| (*c).clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ProviderConfig};
    use crate::integrations::test_utils::{StubAdapter, StubFactory};
    use crate::poller::PollSettings;
    use crate::types::{AccountConfig, ProviderType};
    use tokio_util::sync::CancellationToken;

    fn gmail(id: &str) -> IntegrationKey {
        IntegrationKey::new(ProviderType::Gmail, id)
    }

    fn orchestrator(registry: Arc<AccountRegistry>) -> PollOrchestrator {
        PollOrchestrator::new(
            registry,
            PollSettings {
                worker_pool_size: 2,
                account_deadline: Duration::from_secs(5),
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_connections_reports_every_account() {
        let factory = Arc::new(StubFactory::new());
        factory.insert(StubAdapter::new(gmail("work")).unreachable());
        let registry = AccountRegistry::new(factory);
        registry
            .register(AccountConfig::new(ProviderType::Gmail, "personal", "p.json"))
            .unwrap();
        registry
            .register(AccountConfig::new(ProviderType::Gmail, "work", "w.json"))
            .unwrap();

        let results = test_connections(&registry).await;
        assert_eq!(results.len(), 2);
        assert!(results[&gmail("personal")]);
        assert!(!results[&gmail("work")]);
    }

    #[tokio::test]
    async fn test_status_surfaces_degraded_and_empty_providers() {
        let factory = Arc::new(StubFactory::new());
        factory.insert(StubAdapter::new(gmail("work")).failing_with(FailureKind::AuthExpired));
        let mut config = Config::default();
        config.accounts = vec![
            AccountConfig::new(ProviderType::Gmail, "personal", "p.json"),
            AccountConfig::new(ProviderType::Gmail, "work", "w.json"),
        ];
        config
            .providers
            .insert(ProviderType::Linear, ProviderConfig { enabled: true });
        let (registry, _) = AccountRegistry::from_config(factory, &config);
        let registry = Arc::new(registry);
        let orchestrator = orchestrator(registry.clone());
        orchestrator.run_cycle().await.unwrap();

        let report = status_report(&registry, &orchestrator, true).await;

        let work = report.account(&gmail("work")).unwrap();
        assert!(work.degraded.is_some());
        assert!(matches!(
            work.last_outcome,
            Some(OutcomeStatus::Failure {
                kind: FailureKind::AuthExpired,
                ..
            })
        ));
        let personal = report.account(&gmail("personal")).unwrap();
        assert!(personal.degraded.is_none());
        assert_eq!(personal.reachable, Some(true));
        assert!(matches!(
            personal.last_outcome,
            Some(OutcomeStatus::Success { .. })
        ));

        let linear = report
            .providers
            .iter()
            .find(|p| p.provider == ProviderType::Linear)
            .unwrap();
        assert_eq!(linear.health, ProviderHealth::NoAccounts);
        assert!(report.warnings.iter().any(|w| w.contains("linear")));
        assert!(report.warnings.iter().any(|w| w.contains("gmail:work")));
        assert_eq!(report.last_cycle.unwrap().outcomes.len(), 2);
    }

    #[tokio::test]
    async fn test_status_without_connection_check_leaves_reachability_unknown() {
        let registry = Arc::new(AccountRegistry::new(Arc::new(StubFactory::new())));
        registry
            .register(AccountConfig::new(ProviderType::Gmail, "personal", "p.json"))
            .unwrap();
        let orchestrator = orchestrator(registry.clone());

        let report = status_report(&registry, &orchestrator, false).await;
        assert_eq!(report.accounts.len(), 1);
        assert_eq!(report.accounts[0].reachable, None);
        assert!(report.last_cycle.is_none());
        assert!(report.warnings.is_empty());
    }
}
