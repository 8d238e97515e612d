//! Task lifecycle operations: creation, reservation, status transitions,
//! retry, listing. Template instantiation, genealogy, and worker/queue
//! bookkeeping live in the sibling modules and hang off the same [`Manager`].

mod genealogy;
mod templates;
mod workers;

pub use templates::TemplateRunner;

use std::sync::Arc;

use tracing::info;

use crate::error::{Error, Result};
use crate::model::{Status, Task, TaskDraft, TaskFilter};
use crate::store::TaskStore;

/// Orchestration core. Cheap to clone; all state lives behind the store.
#[derive(Clone)]
pub struct Manager {
    store: Arc<dyn TaskStore>,
}

impl Manager {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub(crate) fn store(&self) -> &dyn TaskStore {
        self.store.as_ref()
    }

    /// Insert a new task. Status is forced to `pending` regardless of what
    /// the caller supplies elsewhere; this is the enqueue path.
    pub async fn create_task(&self, draft: TaskDraft) -> Result<Task> {
        if draft.task_type.trim().is_empty() {
            return Err(Error::validation("task type must not be empty"));
        }
        let task = self.store.insert_task(&draft, Status::Pending).await?;
        info!(task_id = %task.id, friendly_id = task.friendly_id, task_type = %task.task_type, "task created");
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("task {id}")))
    }

    /// Filtered listing, friendly-number ascending, limit/offset pagination.
    pub async fn get_tasks(
        &self,
        filter: &TaskFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>> {
        self.store.list_tasks(filter, limit, offset).await
    }

    /// Persist caller edits to an existing task. The task must exist and not
    /// be deleted; identity fields (id, friendly number) are never changed.
    pub async fn update_task(&self, task: &Task) -> Result<Task> {
        if !self.store.update_task(task).await? {
            return Err(Error::not_found(format!("task {}", task.id)));
        }
        self.get_task(&task.id).await
    }

    pub async fn delete_task(&self, id: &str, actor: Option<&str>) -> Result<()> {
        if !self.store.soft_delete_task(id, actor).await? {
            return Err(Error::not_found(format!("task {id}")));
        }
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Atomically claim the lowest-friendly-number pending task, moving it
    /// to `in_progress`. Concurrent callers never receive the same task.
    pub async fn reserve(&self) -> Result<Task> {
        match self.store.claim_next_pending().await? {
            Some(task) => {
                info!(task_id = %task.id, friendly_id = task.friendly_id, "task reserved");
                Ok(task)
            }
            None => Err(Error::not_found("no pending task")),
        }
    }

    /// Unconditional status overwrite. Respecting the state machine is the
    /// caller's responsibility; workers report terminal cancellation
    /// outcomes through this path.
    pub async fn update_status(&self, id: &str, status: Status) -> Result<Task> {
        if !self.store.set_status(id, status).await? {
            return Err(Error::not_found(format!("task {id}")));
        }
        self.get_task(id).await
    }

    /// Convenience wrapper: `succeeded` on success, `failed` otherwise.
    pub async fn complete(&self, id: &str, success: bool) -> Result<Task> {
        let status = if success {
            Status::Succeeded
        } else {
            Status::Failed
        };
        self.update_status(id, status).await
    }

    /// Request cancellation of a `pending` or `in_progress` task. The task
    /// moves to `pending_cancellation`; halting the work and reporting the
    /// terminal outcome is the worker's responsibility.
    pub async fn cancel_task(&self, id: &str) -> Result<Task> {
        if let Some(task) = self.store.mark_cancelling(id).await? {
            info!(task_id = %id, "task cancellation requested");
            return Ok(task);
        }
        // Guard didn't match: distinguish absent from wrong-status.
        match self.store.get_task(id).await? {
            Some(task) => Err(Error::conflict(format!(
                "task {id} is {} and cannot be cancelled",
                task.status
            ))),
            None => Err(Error::not_found(format!("task {id}"))),
        }
    }

    /// Clone a `failed` task into a fresh pending attempt. The clone keeps
    /// the work definition, gets a new id and friendly number, points back
    /// at the original via `parent_task_id`, and bumps `attempt`.
    pub async fn retry_task(&self, id: &str) -> Result<Task> {
        let original = self.get_task(id).await?;
        if original.status != Status::Failed {
            return Err(Error::conflict(format!(
                "task {id} is {}, only failed tasks can be retried",
                original.status
            )));
        }
        let draft = TaskDraft {
            task_type: original.task_type.clone(),
            reference_id: original.reference_id.clone(),
            payload: original.payload.clone(),
            result: original.result.clone(),
            template_id: original.template_id.clone(),
            parent_task_id: Some(original.id.clone()),
            attempt: original.attempt + 1,
            scheduled_for: original.scheduled_for,
            created_by: None,
        };
        let retry = self.store.insert_task(&draft, Status::Pending).await?;
        info!(task_id = %retry.id, parent = %original.id, attempt = retry.attempt, "task retried");
        Ok(retry)
    }
}
