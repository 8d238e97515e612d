//! SQLite implementation of the task store (WAL mode, embedded migrations).

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::error::{Error, Result};
use crate::model::{
    new_id, now_ts, CleanupEntry, DeadLetterEntry, JobQueueEntry, Status, Task, TaskDraft,
    TaskFilter, TaskInput, TaskTemplate, TemplateDraft, WorkerHeartbeat, WorkerRegistration,
    WorkerType,
};
use crate::store::TaskStore;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) `{data_dir}/taskforge.db` and run migrations.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| Error::Validation(format!("data dir {}: {e}", data_dir.display())))?;
        let db_path = data_dir.join("taskforge.db");
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool and run migrations (used by tests).
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("src/store/migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Persistence(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    // ─── Tasks ──────────────────────────────────────────────────────────

    async fn insert_task(&self, draft: &TaskDraft, status: Status) -> Result<Task> {
        let now = now_ts();
        Ok(sqlx::query_as(
            "INSERT INTO tasks \
             (id, type, reference_id, status, payload, result, template_id, parent_task_id, \
              attempt, scheduled_for, created_at, updated_at, created_by) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING *",
        )
        .bind(new_id())
        .bind(&draft.task_type)
        .bind(&draft.reference_id)
        .bind(status)
        .bind(&draft.payload)
        .bind(&draft.result)
        .bind(&draft.template_id)
        .bind(&draft.parent_task_id)
        .bind(draft.attempt)
        .bind(draft.scheduled_for)
        .bind(now)
        .bind(now)
        .bind(&draft.created_by)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        Ok(
            sqlx::query_as("SELECT * FROM tasks WHERE id = ? AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_tasks(&self, filter: &TaskFilter, limit: i64, offset: i64) -> Result<Vec<Task>> {
        let limit = if limit > 0 { limit } else { -1 };
        let offset = offset.max(0);
        Ok(sqlx::query_as(
            "SELECT * FROM tasks WHERE deleted_at IS NULL \
             AND (?1 IS NULL OR type = ?1) \
             AND (?2 IS NULL OR status = ?2) \
             AND (?3 IS NULL OR reference_id = ?3) \
             ORDER BY friendly_id ASC LIMIT ?4 OFFSET ?5",
        )
        .bind(&filter.task_type)
        .bind(filter.status)
        .bind(&filter.reference_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update_task(&self, task: &Task) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE tasks SET \
             type = ?, reference_id = ?, status = ?, payload = ?, result = ?, \
             scheduled_for = ?, started_at = ?, items_total = ?, items_impacted = ?, \
             items_failed = ?, updated_at = ?, updated_by = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&task.task_type)
        .bind(&task.reference_id)
        .bind(task.status)
        .bind(&task.payload)
        .bind(&task.result)
        .bind(task.scheduled_for)
        .bind(task.started_at)
        .bind(task.items_total)
        .bind(task.items_impacted)
        .bind(task.items_failed)
        .bind(now_ts())
        .bind(&task.updated_by)
        .bind(&task.id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn set_status(&self, id: &str, status: Status) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE tasks SET status = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(status)
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn claim_next_pending(&self) -> Result<Option<Task>> {
        // One guarded UPDATE: selection and transition happen in a single
        // statement, so two concurrent claimers can never win the same row.
        let now = now_ts();
        Ok(sqlx::query_as(
            "UPDATE tasks SET status = 'in_progress', started_at = ?1, updated_at = ?1 \
             WHERE friendly_id = ( \
                 SELECT friendly_id FROM tasks \
                 WHERE status = 'pending' AND deleted_at IS NULL \
                 ORDER BY friendly_id LIMIT 1 \
             ) AND status = 'pending' \
             RETURNING *",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn mark_cancelling(&self, id: &str) -> Result<Option<Task>> {
        Ok(sqlx::query_as(
            "UPDATE tasks SET status = 'pending_cancellation', updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL \
             AND status IN ('pending', 'in_progress') \
             RETURNING *",
        )
        .bind(now_ts())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn soft_delete_task(&self, id: &str, actor: Option<&str>) -> Result<bool> {
        let now = now_ts();
        let rows = sqlx::query(
            "UPDATE tasks SET deleted_at = ?, deleted_by = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(actor)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn tasks_by_parent(&self, parent_id: &str) -> Result<Vec<Task>> {
        Ok(sqlx::query_as(
            "SELECT * FROM tasks WHERE parent_task_id = ? AND deleted_at IS NULL \
             ORDER BY friendly_id ASC",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn count_children(&self, id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tasks WHERE parent_task_id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_task_with_inputs(
        &self,
        draft: &TaskDraft,
        status: Status,
        inputs: &[(String, String)],
        cleanup_expires_at: Option<i64>,
    ) -> Result<Task> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        let task: Task = sqlx::query_as(
            "INSERT INTO tasks \
             (id, type, reference_id, status, payload, result, template_id, parent_task_id, \
              attempt, scheduled_for, created_at, updated_at, created_by) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING *",
        )
        .bind(new_id())
        .bind(&draft.task_type)
        .bind(&draft.reference_id)
        .bind(status)
        .bind(&draft.payload)
        .bind(&draft.result)
        .bind(&draft.template_id)
        .bind(&draft.parent_task_id)
        .bind(draft.attempt)
        .bind(draft.scheduled_for)
        .bind(now)
        .bind(now)
        .bind(&draft.created_by)
        .fetch_one(&mut *tx)
        .await?;

        for (key, value) in inputs {
            sqlx::query(
                "INSERT INTO task_inputs (id, task_id, input_key, input_value, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(new_id())
            .bind(&task.id)
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(expires_at) = cleanup_expires_at {
            sqlx::query(
                "INSERT INTO task_cleanups (id, task_id, expires_at, created_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(new_id())
            .bind(&task.id)
            .bind(expires_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(task)
    }

    async fn task_inputs(&self, task_id: &str) -> Result<Vec<TaskInput>> {
        Ok(
            sqlx::query_as("SELECT * FROM task_inputs WHERE task_id = ? ORDER BY input_key ASC")
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ─── Templates ──────────────────────────────────────────────────────

    async fn insert_template(&self, draft: &TemplateDraft) -> Result<TaskTemplate> {
        let now = now_ts();
        Ok(sqlx::query_as(
            "INSERT INTO task_templates \
             (id, name, description, worker_type_id, is_recurring, cron_schedule, \
              expiration_secs, default_inputs, created_at, updated_at, created_by) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING *",
        )
        .bind(new_id())
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(&draft.worker_type_id)
        .bind(draft.is_recurring)
        .bind(&draft.cron_schedule)
        .bind(draft.expiration_secs)
        .bind(&draft.default_inputs)
        .bind(now)
        .bind(now)
        .bind(&draft.created_by)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn get_template(&self, id: &str) -> Result<Option<TaskTemplate>> {
        Ok(
            sqlx::query_as("SELECT * FROM task_templates WHERE id = ? AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_templates(&self) -> Result<Vec<TaskTemplate>> {
        Ok(sqlx::query_as(
            "SELECT * FROM task_templates WHERE deleted_at IS NULL ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update_template(&self, template: &TaskTemplate) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE task_templates SET \
             name = ?, description = ?, worker_type_id = ?, is_recurring = ?, \
             cron_schedule = ?, expiration_secs = ?, default_inputs = ?, \
             updated_at = ?, updated_by = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.worker_type_id)
        .bind(template.is_recurring)
        .bind(&template.cron_schedule)
        .bind(template.expiration_secs)
        .bind(&template.default_inputs)
        .bind(now_ts())
        .bind(&template.updated_by)
        .bind(&template.id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn soft_delete_template(&self, id: &str, actor: Option<&str>) -> Result<bool> {
        let now = now_ts();
        let rows = sqlx::query(
            "UPDATE task_templates SET deleted_at = ?, deleted_by = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(actor)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    // ─── Worker types ───────────────────────────────────────────────────

    async fn insert_worker_type(&self, name: &str, description: &str) -> Result<WorkerType> {
        let now = now_ts();
        Ok(sqlx::query_as(
            "INSERT INTO worker_types (id, name, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             RETURNING *",
        )
        .bind(new_id())
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn get_worker_type(&self, id: &str) -> Result<Option<WorkerType>> {
        Ok(
            sqlx::query_as("SELECT * FROM worker_types WHERE id = ? AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_worker_types(&self) -> Result<Vec<WorkerType>> {
        Ok(sqlx::query_as(
            "SELECT * FROM worker_types WHERE deleted_at IS NULL ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn soft_delete_worker_type(&self, id: &str) -> Result<bool> {
        let now = now_ts();
        let rows = sqlx::query(
            "UPDATE worker_types SET deleted_at = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    // ─── Worker registrations & heartbeats ──────────────────────────────

    async fn insert_worker_registration(
        &self,
        worker_type_id: &str,
        host_name: &str,
    ) -> Result<WorkerRegistration> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        let registration: WorkerRegistration = sqlx::query_as(
            "INSERT INTO worker_registrations \
             (id, worker_type_id, host_name, start_time, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING *",
        )
        .bind(new_id())
        .bind(worker_type_id)
        .bind(host_name)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO worker_heartbeats (id, worker_id, last_ping, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(&registration.id)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(registration)
    }

    async fn touch_heartbeat(&self, worker_id: &str, ts: i64) -> Result<Option<WorkerHeartbeat>> {
        Ok(sqlx::query_as(
            "UPDATE worker_heartbeats SET last_ping = ?, updated_at = ? \
             WHERE worker_id = ? \
             RETURNING *",
        )
        .bind(ts)
        .bind(ts)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    // ─── Job queue & dead letters ───────────────────────────────────────

    async fn insert_job(&self, task_id: &str, worker_id: Option<&str>) -> Result<JobQueueEntry> {
        let now = now_ts();
        Ok(sqlx::query_as(
            "INSERT INTO job_queue \
             (id, worker_id, task_id, queue_status, enqueued_at, created_at, updated_at) \
             VALUES (?, ?, ?, 'queued', ?, ?, ?) \
             RETURNING *",
        )
        .bind(new_id())
        .bind(worker_id)
        .bind(task_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_jobs(&self) -> Result<Vec<JobQueueEntry>> {
        Ok(
            sqlx::query_as("SELECT * FROM job_queue ORDER BY enqueued_at ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn remove_job(&self, id: &str) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM job_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows > 0)
    }

    async fn insert_dead_letter(
        &self,
        task_id: &str,
        worker_id: Option<&str>,
        error_message: &str,
        retry_count: i64,
    ) -> Result<DeadLetterEntry> {
        let now = now_ts();
        Ok(sqlx::query_as(
            "INSERT INTO dead_letters \
             (id, worker_id, task_id, failed_at, error_message, retry_count, handled, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?) \
             RETURNING *",
        )
        .bind(new_id())
        .bind(worker_id)
        .bind(task_id)
        .bind(now)
        .bind(error_message)
        .bind(retry_count)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>> {
        Ok(
            sqlx::query_as("SELECT * FROM dead_letters ORDER BY failed_at ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ─── Cleanup entries ────────────────────────────────────────────────

    async fn due_cleanups(&self, now: i64) -> Result<Vec<CleanupEntry>> {
        Ok(sqlx::query_as(
            "SELECT * FROM task_cleanups WHERE purged_at IS NULL AND expires_at <= ? \
             ORDER BY expires_at ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn purge_task(&self, entry_id: &str, task_id: &str, now: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE tasks SET deleted_at = ?, deleted_by = 'cleanup', updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE task_cleanups SET purged_at = ? WHERE id = ?")
            .bind(now)
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) async fn memory_store() -> SqliteStore {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteStore::with_pool(pool).await.unwrap()
    }

    fn draft(task_type: &str) -> TaskDraft {
        TaskDraft {
            task_type: task_type.to_string(),
            ..TaskDraft::default()
        }
    }

    #[tokio::test]
    async fn insert_assigns_increasing_friendly_ids() {
        let s = memory_store().await;
        let a = s.insert_task(&draft("send_email"), Status::Pending).await.unwrap();
        let b = s.insert_task(&draft("send_email"), Status::Pending).await.unwrap();
        assert!(b.friendly_id > a.friendly_id);
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, Status::Pending);
    }

    #[tokio::test]
    async fn claim_takes_lowest_pending_and_guards_status() {
        let s = memory_store().await;
        let first = s.insert_task(&draft("a"), Status::Pending).await.unwrap();
        let _second = s.insert_task(&draft("b"), Status::Pending).await.unwrap();

        let claimed = s.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, Status::InProgress);
        assert!(claimed.started_at.is_some());

        // second claim takes the remaining task, third finds nothing
        assert!(s.claim_next_pending().await.unwrap().is_some());
        assert!(s.claim_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_cancelling_only_touches_active_statuses() {
        let s = memory_store().await;
        let t = s.insert_task(&draft("a"), Status::Pending).await.unwrap();
        let updated = s.mark_cancelling(&t.id).await.unwrap().unwrap();
        assert_eq!(updated.status, Status::PendingCancellation);

        let done = s.insert_task(&draft("b"), Status::Succeeded).await.unwrap();
        assert!(s.mark_cancelling(&done.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_and_paginates_in_friendly_order() {
        let s = memory_store().await;
        for i in 0..5 {
            let mut d = draft("bulk");
            d.reference_id = Some(format!("ref-{}", i % 2));
            s.insert_task(&d, Status::Pending).await.unwrap();
        }
        s.insert_task(&draft("other"), Status::Failed).await.unwrap();

        let filter = TaskFilter {
            task_type: Some("bulk".to_string()),
            ..TaskFilter::default()
        };
        let page = s.list_tasks(&filter, 2, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].friendly_id < page[1].friendly_id);

        let failed = s
            .list_tasks(
                &TaskFilter {
                    status: Some(Status::Failed),
                    ..TaskFilter::default()
                },
                0,
                0,
            )
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task_type, "other");
    }

    #[tokio::test]
    async fn task_with_inputs_persists_every_record() {
        let s = memory_store().await;
        let inputs = vec![
            ("subject".to_string(), "\"hello\"".to_string()),
            ("retry".to_string(), "5".to_string()),
        ];
        let task = s
            .insert_task_with_inputs(&draft("templated"), Status::Pending, &inputs, Some(now_ts() + 60))
            .await
            .unwrap();

        let stored = s.task_inputs(&task.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|i| i.task_id == task.id));

        let due = s.due_cleanups(now_ts() + 120).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].task_id, task.id);
    }

    #[tokio::test]
    async fn soft_deleted_tasks_disappear_from_reads() {
        let s = memory_store().await;
        let t = s.insert_task(&draft("gone"), Status::Pending).await.unwrap();
        assert!(s.soft_delete_task(&t.id, Some("tester")).await.unwrap());
        assert!(s.get_task(&t.id).await.unwrap().is_none());
        assert!(!s.soft_delete_task(&t.id, None).await.unwrap());
    }

    #[tokio::test]
    async fn registration_creates_heartbeat_row() {
        let s = memory_store().await;
        let wt = s.insert_worker_type("mailer", "sends mail").await.unwrap();
        let reg = s
            .insert_worker_registration(&wt.id, "host-1")
            .await
            .unwrap();
        let beat = s.touch_heartbeat(&reg.id, now_ts() + 5).await.unwrap();
        assert!(beat.is_some());
        assert!(s.touch_heartbeat("unknown", now_ts()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_soft_deletes_task_and_stamps_entry() {
        let s = memory_store().await;
        let task = s
            .insert_task_with_inputs(&draft("expiring"), Status::Pending, &[], Some(100))
            .await
            .unwrap();
        let entry = &s.due_cleanups(100).await.unwrap()[0];

        s.purge_task(&entry.id, &task.id, 200).await.unwrap();
        assert!(s.get_task(&task.id).await.unwrap().is_none());
        assert!(s.due_cleanups(i64::MAX).await.unwrap().is_empty());
    }
}
