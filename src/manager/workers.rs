//! Worker-type administration, worker registration/heartbeat bookkeeping,
//! and the passive job-queue / dead-letter records.

use tracing::info;

use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::model::{
    now_ts, DeadLetterEntry, JobQueueEntry, WorkerHeartbeat, WorkerRegistration, WorkerType,
};

impl Manager {
    pub async fn create_worker_type(&self, name: &str, description: &str) -> Result<WorkerType> {
        if name.trim().is_empty() {
            return Err(Error::validation("worker type name must not be empty"));
        }
        self.store().insert_worker_type(name, description).await
    }

    pub async fn get_worker_type(&self, id: &str) -> Result<WorkerType> {
        self.store()
            .get_worker_type(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("worker type {id}")))
    }

    pub async fn list_worker_types(&self) -> Result<Vec<WorkerType>> {
        self.store().list_worker_types().await
    }

    pub async fn delete_worker_type(&self, id: &str) -> Result<()> {
        if !self.store().soft_delete_worker_type(id).await? {
            return Err(Error::not_found(format!("worker type {id}")));
        }
        Ok(())
    }

    /// Register a worker process. The registration and its heartbeat row
    /// are created together, so every registered worker can be pinged.
    pub async fn register_worker(
        &self,
        worker_type_id: &str,
        host_name: &str,
    ) -> Result<WorkerRegistration> {
        self.get_worker_type(worker_type_id).await?;
        if host_name.trim().is_empty() {
            return Err(Error::validation("host name must not be empty"));
        }
        let registration = self
            .store()
            .insert_worker_registration(worker_type_id, host_name)
            .await?;
        info!(worker_id = %registration.id, host = %host_name, "worker registered");
        Ok(registration)
    }

    pub async fn worker_heartbeat(&self, worker_id: &str) -> Result<WorkerHeartbeat> {
        self.store()
            .touch_heartbeat(worker_id, now_ts())
            .await?
            .ok_or_else(|| Error::not_found(format!("worker {worker_id}")))
    }

    pub async fn enqueue_job(
        &self,
        task_id: &str,
        worker_id: Option<&str>,
    ) -> Result<JobQueueEntry> {
        self.get_task(task_id).await?;
        self.store().insert_job(task_id, worker_id).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobQueueEntry>> {
        self.store().list_jobs().await
    }

    pub async fn dequeue_job(&self, id: &str) -> Result<()> {
        if !self.store().remove_job(id).await? {
            return Err(Error::not_found(format!("queue entry {id}")));
        }
        Ok(())
    }

    pub async fn record_dead_letter(
        &self,
        task_id: &str,
        worker_id: Option<&str>,
        error_message: &str,
        retry_count: i64,
    ) -> Result<DeadLetterEntry> {
        self.get_task(task_id).await?;
        self.store()
            .insert_dead_letter(task_id, worker_id, error_message, retry_count)
            .await
    }

    pub async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>> {
        self.store().list_dead_letters().await
    }
}
