//! Poll cycles across every registered account.
//!
//! A cycle takes the registry's current snapshot, polls every non-degraded
//! account concurrently (at most `workerPoolSize` at once, each bounded by
//! its own deadline) and waits for every spawned poll to finish before
//! returning. Cycles never overlap: a second caller gets
//! [`PollError::CycleInProgress`] instead of queueing behind the first.
//!
//! Failure policy:
//! - transient / unknown: recorded, retried next cycle, never in-cycle
//! - auth-expired: account marked degraded and skipped until cleared
//! - deadline exceeded: transient, siblings unaffected
//! - shutdown: unfinished accounts reported as failures, cycle marked failed

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::error::{AdapterError, PollError};
use crate::integrations::{AccountRegistry, IntegrationAdapter};
use crate::state::AppState;
use crate::types::{ActionableItem, FailureKind, IntegrationKey, PollOutcome};

/// Orchestrator lifecycle. `Failed` means the last cycle was interrupted by
/// shutdown or lost an adapter task; the next cycle may still start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CycleState {
    Idle,
    Running,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum OutcomeStatus {
    Success { items: usize },
    Failure { kind: FailureKind, detail: String },
    /// Not polled: the account is degraded.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOutcome {
    pub key: IntegrationKey,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    pub duration_ms: u64,
}

/// Per-account results of one cycle, in registration order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub cycle: u64,
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<AccountOutcome>,
    pub item_count: usize,
    pub interrupted: bool,
}

impl CycleReport {
    pub fn outcome(&self, key: &IntegrationKey) -> Option<&OutcomeStatus> {
        self.outcomes.iter().find(|o| &o.key == key).map(|o| &o.status)
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Failure { .. }))
            .count()
    }

    pub fn polled_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.status, OutcomeStatus::Skipped { .. }))
            .count()
    }
}

/// Items from one cycle plus its report.
#[derive(Debug, Clone)]
pub struct CycleResult {
    pub items: Vec<ActionableItem>,
    pub report: Arc<CycleReport>,
}

/// Why and since when an account is out of rotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedInfo {
    pub reason: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub worker_pool_size: usize,
    pub account_deadline: Duration,
}

impl From<&PollConfig> for PollSettings {
    fn from(config: &PollConfig) -> Self {
        Self {
            worker_pool_size: config.worker_pool_size.max(1),
            account_deadline: config.account_deadline(),
        }
    }
}

/// Result of one spawned poll, tagged with its position in the snapshot.
struct PolledAccount {
    index: usize,
    outcome: PollOutcome,
    elapsed: Duration,
}

pub struct PollOrchestrator {
    registry: Arc<AccountRegistry>,
    settings: RwLock<PollSettings>,
    cycle_lock: tokio::sync::Mutex<()>,
    state: Mutex<CycleState>,
    degraded: DashMap<IntegrationKey, DegradedInfo>,
    last_report: RwLock<Option<Arc<CycleReport>>>,
    shutdown: CancellationToken,
    cycles: AtomicU64,
}

impl PollOrchestrator {
    pub fn new(
        registry: Arc<AccountRegistry>,
        settings: PollSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            settings: RwLock::new(settings),
            cycle_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(CycleState::Idle),
            degraded: DashMap::new(),
            last_report: RwLock::new(None),
            shutdown,
            cycles: AtomicU64::new(0),
        }
    }

    /// Applies from the next cycle on.
    pub fn update_settings(&self, settings: PollSettings) {
        *self.settings.write() = settings;
    }

    pub fn state(&self) -> CycleState {
        *self.state.lock()
    }

    pub fn last_report(&self) -> Option<Arc<CycleReport>> {
        self.last_report.read().clone()
    }

    pub fn is_degraded(&self, key: &IntegrationKey) -> bool {
        self.degraded.contains_key(key)
    }

    pub fn degraded_info(&self, key: &IntegrationKey) -> Option<DegradedInfo> {
        self.degraded.get(key).map(|d| d.value().clone())
    }

    pub fn degraded_accounts(&self) -> Vec<(IntegrationKey, DegradedInfo)> {
        let mut accounts: Vec<_> = self
            .degraded
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        accounts.sort_by(|a, b| a.0.cmp(&b.0));
        accounts
    }

    /// Take an account out of rotation. Keeps the original `since` if the
    /// account is already degraded.
    pub fn mark_degraded(&self, key: &IntegrationKey, reason: &str) {
        let mut newly = false;
        self.degraded.entry(key.clone()).or_insert_with(|| {
            newly = true;
            DegradedInfo {
                reason: reason.to_string(),
                since: Utc::now(),
            }
        });
        if newly {
            log::error!(
                "Poller: {} marked degraded, excluded from polling until re-authenticated: {}",
                key,
                reason
            );
        }
    }

    /// Put an account back into rotation (after re-authentication).
    pub fn clear_degraded(&self, key: &IntegrationKey) -> bool {
        let cleared = self.degraded.remove(key).is_some();
        if cleared {
            log::info!("Poller: {} cleared from degraded, polling resumes", key);
        }
        cleared
    }

    /// Drop degraded flags for accounts no longer in the registry.
    pub fn retain_registered(&self) {
        let snapshot = self.registry.snapshot();
        self.degraded.retain(|key, _| snapshot.contains(key));
    }

    /// Run one cycle and return only the flattened items.
    pub async fn poll_all(&self) -> Result<Vec<ActionableItem>, PollError> {
        Ok(self.run_cycle().await?.items)
    }

    /// Run one full cycle. Returns once every spawned poll has finished.
    pub async fn run_cycle(&self) -> Result<CycleResult, PollError> {
        if self.shutdown.is_cancelled() {
            return Err(PollError::ShuttingDown);
        }
        let _cycle = self
            .cycle_lock
            .try_lock()
            .map_err(|_| PollError::CycleInProgress)?;
        *self.state.lock() = CycleState::Running;

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let started_at = Utc::now();
        let settings = *self.settings.read();
        let snapshot = self.registry.snapshot();
        let accounts = snapshot.accounts();

        let semaphore = Arc::new(Semaphore::new(settings.worker_pool_size));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<AccountOutcome>> = vec![None; accounts.len()];

        for (index, account) in accounts.iter().enumerate() {
            if let Some(info) = self.degraded_info(&account.key) {
                slots[index] = Some(AccountOutcome {
                    key: account.key.clone(),
                    status: OutcomeStatus::Skipped {
                        reason: info.reason,
                    },
                    duration_ms: 0,
                });
                continue;
            }
            tasks.spawn(poll_one(
                index,
                account.adapter.clone(),
                semaphore.clone(),
                settings.account_deadline,
                self.shutdown.child_token(),
            ));
        }

        let mut results: Vec<Option<PolledAccount>> = (0..accounts.len()).map(|_| None).collect();
        let mut lost_task = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(polled) => {
                    let index = polled.index;
                    results[index] = Some(polled);
                }
                Err(e) => {
                    log::error!("Poller: adapter task failed: {}", e);
                    lost_task = true;
                }
            }
        }

        let mut items = Vec::new();
        for (index, account) in accounts.iter().enumerate() {
            if slots[index].is_some() {
                continue;
            }
            let (outcome, elapsed) = match results[index].take() {
                Some(polled) => (polled.outcome, polled.elapsed),
                None => (
                    PollOutcome::failure(FailureKind::Unknown, "adapter task panicked"),
                    Duration::ZERO,
                ),
            };
            let status = match outcome {
                PollOutcome::Success(polled_items) => {
                    let total = polled_items.len();
                    let own: Vec<ActionableItem> = polled_items
                        .into_iter()
                        .filter(|item| {
                            item.provider_type == account.key.provider_type
                                && item.account_id == account.key.account_id
                        })
                        .collect();
                    if own.len() != total {
                        log::warn!(
                            "Poller: dropped {} items from {} tagged with another account",
                            total - own.len(),
                            account.key
                        );
                    }
                    let count = own.len();
                    items.extend(own);
                    OutcomeStatus::Success { items: count }
                }
                PollOutcome::Failure { kind, detail } => {
                    let err = AdapterError::classified(kind, detail.clone());
                    if err.is_retryable() {
                        log::warn!("Poller: {} failed, retried next cycle: {}", account.key, err);
                    } else {
                        log::warn!(
                            "Poller: {} failed: {}. {}",
                            account.key,
                            err,
                            err.recovery_suggestion()
                        );
                    }
                    if err.requires_user_action() {
                        self.mark_degraded(&account.key, &detail);
                    }
                    OutcomeStatus::Failure { kind, detail }
                }
            };
            slots[index] = Some(AccountOutcome {
                key: account.key.clone(),
                status,
                duration_ms: elapsed.as_millis() as u64,
            });
        }

        let interrupted = self.shutdown.is_cancelled();
        let report = Arc::new(CycleReport {
            cycle,
            generation: snapshot.generation(),
            started_at,
            finished_at: Utc::now(),
            outcomes: slots.into_iter().flatten().collect(),
            item_count: items.len(),
            interrupted,
        });

        log::info!(
            "Poller: cycle {} polled {} accounts, {} items, {} failures{}",
            cycle,
            report.polled_count(),
            report.item_count,
            report.failure_count(),
            if interrupted { " (interrupted by shutdown)" } else { "" }
        );

        *self.last_report.write() = Some(report.clone());
        *self.state.lock() = if interrupted || lost_task {
            CycleState::Failed
        } else {
            CycleState::Idle
        };
        Ok(CycleResult { items, report })
    }
}

/// Poll one account. The deadline starts once a worker slot is acquired.
async fn poll_one(
    index: usize,
    adapter: Arc<dyn IntegrationAdapter>,
    semaphore: Arc<Semaphore>,
    deadline: Duration,
    cancel: CancellationToken,
) -> PolledAccount {
    let cancelled = |elapsed| PolledAccount {
        index,
        outcome: PollOutcome::failure(FailureKind::Transient, "cancelled: shutdown"),
        elapsed,
    };

    let _permit = tokio::select! {
        permit = semaphore.acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => return cancelled(Duration::ZERO),
        },
        _ = cancel.cancelled() => return cancelled(Duration::ZERO),
    };

    let started = Instant::now();
    let outcome = tokio::select! {
        result = tokio::time::timeout(deadline, adapter.poll()) => match result {
            Ok(outcome) => outcome,
            Err(_) => PollOutcome::failure(
                FailureKind::Transient,
                format!("deadline of {}s exceeded", deadline.as_secs_f64()),
            ),
        },
        _ = cancel.cancelled() => return cancelled(started.elapsed()),
    };
    PolledAccount {
        index,
        outcome,
        elapsed: started.elapsed(),
    }
}

// =============================================================================
// Recurring loop
// =============================================================================

/// Background poll loop: one cycle per interval, items handed to ingestion.
///
/// Woken early by `AppState::poller_wake`; exits when the shutdown token fires.
pub async fn run_poller(state: Arc<AppState>) {
    let startup_delay = state.poll_config().startup_delay();
    tokio::select! {
        _ = tokio::time::sleep(startup_delay) => {},
        _ = state.shutdown.cancelled() => return,
    }
    log::info!("Poller: started");

    loop {
        match state.orchestrator.run_cycle().await {
            Ok(cycle) => {
                if !cycle.items.is_empty() {
                    state.tasks.ingest_batch(&cycle.items).await;
                }
            }
            Err(PollError::ShuttingDown) => break,
            Err(PollError::CycleInProgress) => {
                log::debug!("Poller: previous cycle still running, skipping");
            }
        }

        let interval = state.poll_config().interval();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = state.poller_wake.notified() => {
                log::info!("Poller: woken by manual poll signal");
            },
            _ = state.shutdown.cancelled() => break,
        }
    }
    log::info!("Poller: stopped");
}
