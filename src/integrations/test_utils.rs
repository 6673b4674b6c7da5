//! Stub adapters and factory for registry, poller and service tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AdapterFactory, IntegrationAdapter};
use crate::error::AdapterInitError;
use crate::types::{AccountConfig, ActionableItem, FailureKind, IntegrationKey, PollOutcome};

/// Adapter that replays scripted outcomes. The last scripted outcome repeats.
pub struct StubAdapter {
    key: IntegrationKey,
    outcomes: Mutex<VecDeque<PollOutcome>>,
    delay: Option<Duration>,
    reachable: bool,
    polls: AtomicUsize,
}

impl StubAdapter {
    pub fn new(key: IntegrationKey) -> Self {
        Self {
            key,
            outcomes: Mutex::new(VecDeque::new()),
            delay: None,
            reachable: true,
            polls: AtomicUsize::new(0),
        }
    }

    /// Items tagged with this adapter's key, `source_reference` = `{prefix}-{n}`.
    pub fn items(key: &IntegrationKey, count: usize) -> Vec<ActionableItem> {
        (0..count)
            .map(|n| {
                ActionableItem::new(
                    key,
                    &format!("{}-{}", key.account_id, n),
                    &format!("Item {} from {}", n, key),
                )
            })
            .collect()
    }

    pub fn succeeding_with(self, count: usize) -> Self {
        let items = Self::items(&self.key, count);
        self.then(PollOutcome::Success(items))
    }

    pub fn failing_with(self, kind: FailureKind) -> Self {
        self.then(PollOutcome::failure(kind, format!("stub {kind}")))
    }

    pub fn then(self, outcome: PollOutcome) -> Self {
        self.outcomes.lock().push_back(outcome);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> PollOutcome {
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap_or(PollOutcome::Success(vec![]))
        } else {
            outcomes
                .front()
                .cloned()
                .unwrap_or(PollOutcome::Success(vec![]))
        }
    }
}

#[async_trait]
impl IntegrationAdapter for StubAdapter {
    fn key(&self) -> &IntegrationKey {
        &self.key
    }

    async fn poll(&self) -> PollOutcome {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_outcome()
    }

    async fn test_connection(&self) -> bool {
        self.reachable
    }
}

/// Factory that hands out preconfigured stubs and counts constructions.
#[derive(Default)]
pub struct StubFactory {
    adapters: Mutex<HashMap<IntegrationKey, Arc<StubAdapter>>>,
    failing: Mutex<HashSet<IntegrationKey>>,
    created: AtomicUsize,
}

impl StubFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preconfigure the adapter returned for `adapter.key()`.
    pub fn insert(&self, adapter: StubAdapter) -> Arc<StubAdapter> {
        let adapter = Arc::new(adapter);
        self.adapters
            .lock()
            .insert(adapter.key().clone(), adapter.clone());
        adapter
    }

    pub fn fail_for(&self, key: IntegrationKey) {
        self.failing.lock().insert(key);
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for StubFactory {
    fn create(
        &self,
        config: &AccountConfig,
    ) -> Result<Arc<dyn IntegrationAdapter>, AdapterInitError> {
        let key = config.key();
        if self.failing.lock().contains(&key) {
            return Err(AdapterInitError::Credential {
                path: config.credential.clone().into(),
                reason: "stub failure".to_string(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let adapter = self
            .adapters
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Arc::new(StubAdapter::new(key)));
        Ok(adapter)
    }
}
