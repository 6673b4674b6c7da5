//! Task rows and the `TaskStore` persistence seam.

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{DbError, TaskDb};
use crate::types::ProviderType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
        }
    }
}

/// A row from the `tasks` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub priority_score: Option<i32>,
    pub priority_reason: Option<String>,
    pub status: String,
    pub account_id: Option<String>,
    pub provider_type: Option<String>,
    pub source_reference: Option<String>,
    pub due_date: Option<String>,
    pub received_at: Option<String>,
    pub metadata_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for a task about to be inserted. Id and timestamps are assigned on insert.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub priority_score: Option<i32>,
    pub priority_reason: Option<String>,
    pub account_id: Option<String>,
    pub provider_type: Option<ProviderType>,
    pub source_reference: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub received_at: Option<chrono::DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

/// Result of an insert: a fresh row, or the row that already held the source.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskInsert {
    Created(Task),
    Existing(Task),
}

impl TaskInsert {
    pub fn task(&self) -> &Task {
        match self {
            TaskInsert::Created(t) | TaskInsert::Existing(t) => t,
        }
    }

    pub fn into_task(self) -> Task {
        match self {
            TaskInsert::Created(t) | TaskInsert::Existing(t) => t,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, TaskInsert::Created(_))
    }
}

/// Persistence collaborator for task ingestion.
pub trait TaskStore: Send + Sync {
    fn find_task(
        &self,
        provider: ProviderType,
        account_id: &str,
        source_reference: &str,
    ) -> Result<Option<Task>, DbError>;

    /// Insert a task. A sourced task whose source is already stored returns
    /// the stored row instead.
    fn create_task(&self, task: NewTask) -> Result<TaskInsert, DbError>;

    fn get_task(&self, id: &str) -> Result<Option<Task>, DbError>;

    fn list_tasks_for_account(
        &self,
        account_id: &str,
        status: TaskStatus,
    ) -> Result<Vec<Task>, DbError>;

    fn count_tasks(&self) -> Result<usize, DbError>;
}

const TASK_COLUMNS: &str = "id, title, description, priority, priority_score, priority_reason,
     status, account_id, provider_type, source_reference, due_date, received_at,
     metadata_json, created_at, updated_at";

impl TaskDb {
    fn map_task_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
        Ok(Task {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            priority: row.get(3)?,
            priority_score: row.get(4)?,
            priority_reason: row.get(5)?,
            status: row.get(6)?,
            account_id: row.get(7)?,
            provider_type: row.get(8)?,
            source_reference: row.get(9)?,
            due_date: row.get(10)?,
            received_at: row.get(11)?,
            metadata_json: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, DbError> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], Self::map_task_row)
            .optional()?)
    }

    pub fn find_task_by_source(
        &self,
        provider: ProviderType,
        account_id: &str,
        source_reference: &str,
    ) -> Result<Option<Task>, DbError> {
        let sql = format!(
            "SELECT {} FROM tasks
             WHERE provider_type = ?1 AND account_id = ?2 AND source_reference = ?3",
            TASK_COLUMNS
        );
        Ok(self
            .conn
            .query_row(
                &sql,
                params![provider.as_str(), account_id, source_reference],
                Self::map_task_row,
            )
            .optional()?)
    }

    /// Insert a task. `INSERT OR IGNORE` against the partial unique source
    /// index makes a concurrent double insert collapse onto one row.
    pub fn insert_task(&self, new: NewTask) -> Result<TaskInsert, DbError> {
        let now = Utc::now().to_rfc3339();
        let id = uuid::Uuid::new_v4().to_string();
        let metadata_json = new
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let provider = new.provider_type.map(|p| p.as_str());
        let due_date = new.due_date.map(|d| d.format("%Y-%m-%d").to_string());
        let received_at = new.received_at.map(|r| r.to_rfc3339());

        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO tasks (
                id, title, description, priority, priority_score, priority_reason,
                status, account_id, provider_type, source_reference, due_date, received_at,
                metadata_json, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                id,
                new.title,
                new.description,
                new.priority,
                new.priority_score,
                new.priority_reason,
                new.account_id,
                provider,
                new.source_reference,
                due_date,
                received_at,
                metadata_json,
                now,
            ],
        )?;

        if changed == 1 {
            let task = self
                .get_task(&id)?
                .ok_or_else(|| DbError::LostInsert(id.clone()))?;
            return Ok(TaskInsert::Created(task));
        }

        match (new.provider_type, &new.account_id, &new.source_reference) {
            (Some(provider), Some(account_id), Some(source)) => self
                .find_task_by_source(provider, account_id, source)?
                .map(TaskInsert::Existing)
                .ok_or_else(|| DbError::LostInsert(source.clone())),
            _ => Err(DbError::LostInsert(id)),
        }
    }

    pub fn get_tasks_for_account(
        &self,
        account_id: &str,
        status: TaskStatus,
    ) -> Result<Vec<Task>, DbError> {
        let sql = format!(
            "SELECT {} FROM tasks
             WHERE account_id = ?1 AND status = ?2
             ORDER BY priority, due_date, created_at",
            TASK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![account_id, status.as_str()], Self::map_task_row)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    pub fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn count_tasks(&self) -> Result<usize, DbError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

/// `TaskStore` over one SQLite connection, serialized by a mutex.
pub struct SqliteTaskStore {
    db: Mutex<TaskDb>,
}

impl SqliteTaskStore {
    pub fn new(db: TaskDb) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Run `f` with the connection locked, for queries outside the trait.
    pub fn with_db<T>(&self, f: impl FnOnce(&TaskDb) -> T) -> T {
        f(&self.db.lock())
    }
}

impl TaskStore for SqliteTaskStore {
    fn find_task(
        &self,
        provider: ProviderType,
        account_id: &str,
        source_reference: &str,
    ) -> Result<Option<Task>, DbError> {
        self.db
            .lock()
            .find_task_by_source(provider, account_id, source_reference)
    }

    fn create_task(&self, task: NewTask) -> Result<TaskInsert, DbError> {
        self.db.lock().insert_task(task)
    }

    fn get_task(&self, id: &str) -> Result<Option<Task>, DbError> {
        self.db.lock().get_task(id)
    }

    fn list_tasks_for_account(
        &self,
        account_id: &str,
        status: TaskStatus,
    ) -> Result<Vec<Task>, DbError> {
        self.db.lock().get_tasks_for_account(account_id, status)
    }

    fn count_tasks(&self) -> Result<usize, DbError> {
        self.db.lock().count_tasks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    fn sourced(title: &str, account: &str, source: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            priority: "P2".to_string(),
            account_id: Some(account.to_string()),
            provider_type: Some(ProviderType::Gmail),
            source_reference: Some(source.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = test_db();
        let mut new = sourced("Reply to Sam", "personal", "msg-1");
        new.due_date = NaiveDate::from_ymd_opt(2025, 3, 1);
        new.metadata = Some(serde_json::json!({"sender": "sam@example.com"}));
        let inserted = db.insert_task(new).unwrap();
        assert!(inserted.was_created());

        let task = db.get_task(&inserted.task().id).unwrap().unwrap();
        assert_eq!(task.title, "Reply to Sam");
        assert_eq!(task.status, "pending");
        assert_eq!(task.provider_type.as_deref(), Some("gmail"));
        assert_eq!(task.due_date.as_deref(), Some("2025-03-01"));
        assert!(task.metadata_json.unwrap().contains("sam@example.com"));
    }

    #[test]
    fn test_duplicate_source_returns_existing_row() {
        let db = test_db();
        let first = db.insert_task(sourced("A", "personal", "msg-42")).unwrap();
        let second = db.insert_task(sourced("A again", "personal", "msg-42")).unwrap();
        assert!(!second.was_created());
        assert_eq!(second.task().id, first.task().id);
        assert_eq!(second.task().title, "A");
        assert_eq!(db.count_tasks().unwrap(), 1);

        // Same source under another account is a different object
        let other = db.insert_task(sourced("A", "work", "msg-42")).unwrap();
        assert!(other.was_created());
        assert_eq!(db.count_tasks().unwrap(), 2);
    }

    #[test]
    fn test_manual_tasks_are_never_deduplicated() {
        let db = test_db();
        let manual = || NewTask {
            title: "Buy milk".to_string(),
            priority: "P3".to_string(),
            ..Default::default()
        };
        assert!(db.insert_task(manual()).unwrap().was_created());
        assert!(db.insert_task(manual()).unwrap().was_created());
        assert_eq!(db.count_tasks().unwrap(), 2);
    }

    #[test]
    fn test_list_for_account_by_status() {
        let store = SqliteTaskStore::new(test_db());
        let a = store
            .create_task(sourced("One", "work", "m1"))
            .unwrap()
            .into_task();
        store.create_task(sourced("Two", "work", "m2")).unwrap();
        store.create_task(sourced("Other", "personal", "m3")).unwrap();

        store.with_db(|db| db.set_task_status(&a.id, TaskStatus::Completed).unwrap());

        let pending = store
            .list_tasks_for_account("work", TaskStatus::Pending)
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "Two");
        let done = store
            .list_tasks_for_account("work", TaskStatus::Completed)
            .unwrap();
        assert_eq!(done.len(), 1);
        assert!(store
            .find_task(ProviderType::Gmail, "personal", "m3")
            .unwrap()
            .is_some());
        assert!(store
            .find_task(ProviderType::Linear, "personal", "m3")
            .unwrap()
            .is_none());
    }
}
