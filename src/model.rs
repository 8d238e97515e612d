//! Data model: tasks, templates, workers, queue records.
//!
//! Every entity carries the same explicit audit columns
//! (`created_at/updated_at/deleted_at` + actor fields) instead of a shared
//! base struct. Deletion is soft — readers filter `deleted_at IS NULL`.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a new time-ordered UUID (v7) string.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Current unix timestamp in seconds.
pub fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ─── Status ─────────────────────────────────────────────────────────────────

/// Task lifecycle status.
///
/// ```text
/// pending → in_progress → succeeded
///                        → failed
/// pending|in_progress → pending_cancellation → cancelled
///                                             → failed_to_cancel
/// ```
///
/// The manager forces `pending` on enqueue and performs the guarded
/// `pending → in_progress` and `→ pending_cancellation` transitions; the
/// terminal cancellation outcomes are reported back by workers through
/// `update_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    PendingCancellation,
    Cancelled,
    FailedToCancel,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::PendingCancellation => "pending_cancellation",
            Status::Cancelled => "cancelled",
            Status::FailedToCancel => "failed_to_cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "pending" => Some(Status::Pending),
            "in_progress" => Some(Status::InProgress),
            "succeeded" => Some(Status::Succeeded),
            "failed" => Some(Status::Failed),
            "pending_cancellation" => Some(Status::PendingCancellation),
            "cancelled" => Some(Status::Cancelled),
            "failed_to_cancel" => Some(Status::FailedToCancel),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Tasks ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: String,
    /// Human-friendly monotonically increasing ordinal, assigned at insert,
    /// never reused. Distinct from the UUID primary identifier.
    pub friendly_id: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub task_type: String,
    pub reference_id: Option<String>,
    pub status: Status,
    /// Opaque serialized payload (JSON document for template-born tasks).
    pub payload: String,
    /// Opaque serialized result, written by workers.
    pub result: String,
    pub template_id: Option<String>,
    /// Links a retry to its originating task and a sub-task to its
    /// structural parent — one field for both relations.
    pub parent_task_id: Option<String>,
    pub attempt: i64,
    pub scheduled_for: Option<i64>,
    pub started_at: Option<i64>,
    pub items_total: i64,
    pub items_impacted: i64,
    pub items_failed: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub deleted_by: Option<String>,
}

/// Caller-supplied fields for a new task; everything else (id, friendly
/// number, timestamps) is assigned by the store at insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDraft {
    #[serde(rename = "type")]
    pub task_type: String,
    pub reference_id: Option<String>,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub result: String,
    pub template_id: Option<String>,
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub attempt: i64,
    pub scheduled_for: Option<i64>,
    pub created_by: Option<String>,
}

/// One key/value record persisted per merged input of a template-born task.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskInput {
    pub id: String,
    pub task_id: String,
    pub input_key: String,
    pub input_value: String,
    pub created_at: i64,
}

/// Nested task tree node: a task plus its (possibly empty) children.
#[derive(Debug, Clone, Serialize)]
pub struct TaskNode {
    pub task: Task,
    pub children: Vec<TaskNode>,
}

// ─── Templates ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub worker_type_id: String,
    pub is_recurring: bool,
    /// Cron expression; meaningful only when `is_recurring` is true.
    pub cron_schedule: String,
    /// Seconds until tasks born from this template expire (0 = never).
    pub expiration_secs: i64,
    /// Default-inputs document: JSON object of key → value.
    pub default_inputs: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub deleted_by: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub worker_type_id: String,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub cron_schedule: String,
    #[serde(default)]
    pub expiration_secs: i64,
    #[serde(default)]
    pub default_inputs: String,
    pub created_by: Option<String>,
}

// ─── Workers ────────────────────────────────────────────────────────────────

/// Governs which `type` a template-generated task carries.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkerType {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub deleted_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkerRegistration {
    pub id: String,
    pub worker_type_id: String,
    pub host_name: String,
    pub start_time: i64,
    pub shutdown_time: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// Liveness bookkeeping only — no scheduling decision depends on it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkerHeartbeat {
    pub id: String,
    pub worker_id: String,
    pub last_ping: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

// ─── Queue, dead letters, cleanup ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobQueueEntry {
    pub id: String,
    pub worker_id: Option<String>,
    pub task_id: String,
    pub queue_status: String,
    pub enqueued_at: i64,
    pub dequeued_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeadLetterEntry {
    pub id: String,
    pub worker_id: Option<String>,
    pub task_id: String,
    pub failed_at: i64,
    pub error_message: String,
    pub retry_count: i64,
    pub handled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Expiry marker written at template instantiation when the template
/// carries an expiration; consumed by the background cleanup pass.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CleanupEntry {
    pub id: String,
    pub task_id: String,
    pub expires_at: i64,
    pub purged_at: Option<i64>,
    pub created_at: i64,
}

// ─── Filters ────────────────────────────────────────────────────────────────

/// Optional equality filters for task listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub status: Option<Status>,
    pub reference_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            Status::Pending,
            Status::InProgress,
            Status::Succeeded,
            Status::Failed,
            Status::PendingCancellation,
            Status::Cancelled,
            Status::FailedToCancel,
        ] {
            assert_eq!(Status::parse(s.as_str()), Some(s));
        }
        assert_eq!(Status::parse("complete"), None);
    }

    #[test]
    fn new_ids_are_unique_uuids() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
