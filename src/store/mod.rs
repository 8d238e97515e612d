//! Abstract task-store contract.
//!
//! The core never talks to a database directly — everything goes through
//! [`TaskStore`], so any engine that can provide atomic single-row
//! conditional updates and multi-row transactions is substitutable. The
//! shipped implementation is [`SqliteStore`].

pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    CleanupEntry, DeadLetterEntry, JobQueueEntry, Status, Task, TaskDraft, TaskFilter, TaskInput,
    TaskTemplate, TemplateDraft, WorkerHeartbeat, WorkerRegistration, WorkerType,
};

/// Durable record storage consumed by the manager.
///
/// Methods documented as *atomic* must be implemented as a single
/// conditional operation — a read followed by a separate write is a
/// correctness bug under concurrency. Multi-record writes must commit or
/// roll back together.
#[async_trait]
pub trait TaskStore: Send + Sync {
    // ─── Tasks ──────────────────────────────────────────────────────────

    /// Insert a task, assigning its id, friendly number, and timestamps.
    async fn insert_task(&self, draft: &TaskDraft, status: Status) -> Result<Task>;

    async fn get_task(&self, id: &str) -> Result<Option<Task>>;

    /// Filtered listing ordered by friendly number ascending.
    /// `limit <= 0` means no limit; `offset <= 0` means no offset.
    async fn list_tasks(&self, filter: &TaskFilter, limit: i64, offset: i64) -> Result<Vec<Task>>;

    /// Persist caller-mutable fields of an existing task.
    async fn update_task(&self, task: &Task) -> Result<bool>;

    /// Unconditional status overwrite. Returns false if the task is absent.
    async fn set_status(&self, id: &str, status: Status) -> Result<bool>;

    /// *Atomic*: claim the lowest-friendly-number `pending` task and move it
    /// to `in_progress`. Two concurrent callers can never receive the same
    /// task. Returns `None` when nothing is pending.
    async fn claim_next_pending(&self) -> Result<Option<Task>>;

    /// *Atomic*: move a task to `pending_cancellation` only if it is
    /// currently `pending` or `in_progress`. Returns the updated task, or
    /// `None` when the guard did not match.
    async fn mark_cancelling(&self, id: &str) -> Result<Option<Task>>;

    /// Soft-delete. Returns false if the task is absent.
    async fn soft_delete_task(&self, id: &str, actor: Option<&str>) -> Result<bool>;

    /// Children by equality on `parent_task_id`, friendly order.
    async fn tasks_by_parent(&self, parent_id: &str) -> Result<Vec<Task>>;

    async fn count_children(&self, id: &str) -> Result<i64>;

    /// *Transactional*: insert the task, one input record per pair, and an
    /// optional cleanup entry — all or nothing.
    async fn insert_task_with_inputs(
        &self,
        draft: &TaskDraft,
        status: Status,
        inputs: &[(String, String)],
        cleanup_expires_at: Option<i64>,
    ) -> Result<Task>;

    async fn task_inputs(&self, task_id: &str) -> Result<Vec<TaskInput>>;

    // ─── Templates ──────────────────────────────────────────────────────

    async fn insert_template(&self, draft: &TemplateDraft) -> Result<TaskTemplate>;

    async fn get_template(&self, id: &str) -> Result<Option<TaskTemplate>>;

    async fn list_templates(&self) -> Result<Vec<TaskTemplate>>;

    async fn update_template(&self, template: &TaskTemplate) -> Result<bool>;

    async fn soft_delete_template(&self, id: &str, actor: Option<&str>) -> Result<bool>;

    // ─── Worker types ───────────────────────────────────────────────────

    async fn insert_worker_type(&self, name: &str, description: &str) -> Result<WorkerType>;

    async fn get_worker_type(&self, id: &str) -> Result<Option<WorkerType>>;

    async fn list_worker_types(&self) -> Result<Vec<WorkerType>>;

    async fn soft_delete_worker_type(&self, id: &str) -> Result<bool>;

    // ─── Worker registrations & heartbeats ──────────────────────────────

    /// *Transactional*: insert the registration and its heartbeat row.
    async fn insert_worker_registration(
        &self,
        worker_type_id: &str,
        host_name: &str,
    ) -> Result<WorkerRegistration>;

    /// *Atomic*: stamp `last_ping` for the worker's heartbeat row.
    /// Returns `None` when the worker has no heartbeat row.
    async fn touch_heartbeat(&self, worker_id: &str, ts: i64) -> Result<Option<WorkerHeartbeat>>;

    // ─── Job queue & dead letters ───────────────────────────────────────

    async fn insert_job(&self, task_id: &str, worker_id: Option<&str>) -> Result<JobQueueEntry>;

    async fn list_jobs(&self) -> Result<Vec<JobQueueEntry>>;

    /// Remove a queue entry. Returns false if absent.
    async fn remove_job(&self, id: &str) -> Result<bool>;

    async fn insert_dead_letter(
        &self,
        task_id: &str,
        worker_id: Option<&str>,
        error_message: &str,
        retry_count: i64,
    ) -> Result<DeadLetterEntry>;

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>>;

    // ─── Cleanup entries ────────────────────────────────────────────────

    /// Unpurged entries with `expires_at <= now`.
    async fn due_cleanups(&self, now: i64) -> Result<Vec<CleanupEntry>>;

    /// *Transactional*: soft-delete the expired task and stamp the cleanup
    /// entry purged.
    async fn purge_task(&self, entry_id: &str, task_id: &str, now: i64) -> Result<()>;
}
