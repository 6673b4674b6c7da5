//! Task ingestion: polled items and manual requests → persisted tasks.
//!
//! Every path validates before it touches storage. An unknown account id is
//! rejected with the list of configured accounts and nothing is written.
//! Polled items are idempotent on (provider, account, source reference):
//! redelivery returns the task created the first time.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::db::{NewTask, Task, TaskInsert, TaskStore};
use crate::error::IngestError;
use crate::extract::MAX_TITLE_CHARS;
use crate::scoring::score_priority;
use crate::types::ActionableItem;
use crate::util::{truncate_chars, validate_bounded_string};
use crate::validation::AccountValidationCache;

const MAX_DESCRIPTION_CHARS: usize = 2000;
const PRIORITIES: &[&str] = &["P1", "P2", "P3"];

/// Manual task creation, for callers outside the poll loop.
#[derive(Debug, Clone, Default)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    /// Empty means "not tied to an account".
    pub account_id: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<NaiveDate>,
}

impl CreateTaskRequest {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Default::default()
        }
    }

    pub fn for_account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }
}

/// Counts from one batch of polled items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub created: usize,
    pub existing: usize,
    pub rejected: usize,
    pub failed: usize,
}

pub struct TaskIngestionService {
    validation: Arc<AccountValidationCache>,
    store: Arc<dyn TaskStore>,
}

impl TaskIngestionService {
    pub fn new(validation: Arc<AccountValidationCache>, store: Arc<dyn TaskStore>) -> Self {
        Self { validation, store }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Convert a polled item into a task, or return the task it already became.
    pub async fn ingest(&self, item: &ActionableItem) -> Result<Task, IngestError> {
        Ok(self.ingest_item(item).await?.into_task())
    }

    async fn ingest_item(&self, item: &ActionableItem) -> Result<TaskInsert, IngestError> {
        // Identity is normalized once; the check, the lookup and the insert all use it
        let account_id = item.account_id.trim();
        let source_reference = item.source_reference.trim();
        if account_id.is_empty() {
            return Err(IngestError::InvalidItem(format!(
                "{} item '{}' has no account id",
                item.provider_type, source_reference
            )));
        }
        if source_reference.is_empty() {
            return Err(IngestError::InvalidItem(format!(
                "item from {} has no source reference",
                item.key()
            )));
        }
        let title = validate_bounded_string(&item.title, "title", 1, MAX_TITLE_CHARS)
            .map_err(IngestError::InvalidItem)?;
        self.validation.check(account_id).await?;

        if let Some(existing) =
            self.store
                .find_task(item.provider_type, account_id, source_reference)?
        {
            log::debug!(
                "Tasks: {} already ingested from {}:{} as {}",
                source_reference,
                item.provider_type,
                account_id,
                existing.id
            );
            return Ok(TaskInsert::Existing(existing));
        }

        let today = chrono::Local::now().date_naive();
        let score = score_priority(item.due_date, item.priority_hint, item.received_at, today);
        let metadata = if item.metadata.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(item.metadata.clone()))
        };

        // A concurrent ingest of the same source collapses onto one row in the store
        let inserted = self.store.create_task(NewTask {
            title,
            description: item
                .description
                .as_deref()
                .map(|d| truncate_chars(d.trim(), MAX_DESCRIPTION_CHARS))
                .filter(|d| !d.is_empty()),
            priority: score.label.to_string(),
            priority_score: Some(score.score),
            priority_reason: Some(score.reason),
            account_id: Some(account_id.to_string()),
            provider_type: Some(item.provider_type),
            source_reference: Some(source_reference.to_string()),
            due_date: item.due_date,
            received_at: Some(item.received_at),
            metadata,
        })?;
        if inserted.was_created() {
            log::debug!(
                "Tasks: created {} from {}:{} {}",
                inserted.task().id,
                item.provider_type,
                account_id,
                source_reference
            );
        }
        Ok(inserted)
    }

    /// Ingest a cycle's items. One bad item never blocks the rest.
    pub async fn ingest_batch(&self, items: &[ActionableItem]) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for item in items {
            match self.ingest_item(item).await {
                Ok(TaskInsert::Created(_)) => summary.created += 1,
                Ok(TaskInsert::Existing(_)) => summary.existing += 1,
                Err(e) if e.is_validation() => {
                    log::warn!("Tasks: rejected item from {}: {}", item.key(), e);
                    summary.rejected += 1;
                }
                Err(e) => {
                    log::error!("Tasks: failed to store item from {}: {}", item.key(), e);
                    summary.failed += 1;
                }
            }
        }
        log::info!(
            "Tasks: ingested {} items ({} new, {} already known, {} rejected, {} failed)",
            items.len(),
            summary.created,
            summary.existing,
            summary.rejected,
            summary.failed
        );
        summary
    }

    /// Create a task outside the poll loop.
    pub async fn create_task(&self, request: CreateTaskRequest) -> Result<Task, IngestError> {
        let CreateTaskRequest {
            title,
            description,
            account_id,
            priority,
            due_date,
        } = request;

        let title = validate_bounded_string(&title, "title", 1, MAX_TITLE_CHARS)
            .map_err(IngestError::InvalidItem)?;
        let priority = priority.unwrap_or_else(|| "P2".to_string());
        if !PRIORITIES.contains(&priority.as_str()) {
            return Err(IngestError::InvalidItem(format!(
                "priority must be one of {}",
                PRIORITIES.join(", ")
            )));
        }
        let description = match description {
            Some(d) if !d.trim().is_empty() => Some(
                validate_bounded_string(&d, "description", 1, MAX_DESCRIPTION_CHARS)
                    .map_err(IngestError::InvalidItem)?,
            ),
            _ => None,
        };

        let account_id = match account_id {
            Some(id) if !id.is_empty() => {
                let id = id.trim();
                self.validation.check(id).await?;
                Some(id.to_string())
            }
            _ => None,
        };

        let task = self
            .store
            .create_task(NewTask {
                title,
                description,
                priority,
                account_id,
                due_date,
                ..Default::default()
            })?
            .into_task();
        log::info!("Tasks: created manual task {}", task.id);
        Ok(task)
    }
}
