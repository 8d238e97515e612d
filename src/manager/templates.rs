//! Template CRUD and instantiation: merging default inputs with caller
//! overrides and materializing a task plus its input records in one
//! transaction.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::model::{now_ts, Status, Task, TaskDraft, TaskTemplate, TemplateDraft};

/// The slice of the manager the schedule reconciler depends on. Kept as a
/// trait so the reconciler can be exercised against a stub.
#[async_trait]
pub trait TemplateRunner: Send + Sync {
    async fn task_templates(&self) -> Result<Vec<TaskTemplate>>;

    async fn create_task_from_template(
        &self,
        template_id: &str,
        overrides: Option<Map<String, Value>>,
        scheduled_for: Option<i64>,
    ) -> Result<Task>;
}

#[async_trait]
impl TemplateRunner for Manager {
    async fn task_templates(&self) -> Result<Vec<TaskTemplate>> {
        self.store().list_templates().await
    }

    async fn create_task_from_template(
        &self,
        template_id: &str,
        overrides: Option<Map<String, Value>>,
        scheduled_for: Option<i64>,
    ) -> Result<Task> {
        Manager::create_task_from_template(self, template_id, overrides, scheduled_for).await
    }
}

impl Manager {
    pub async fn create_template(&self, draft: TemplateDraft) -> Result<TaskTemplate> {
        if draft.name.trim().is_empty() {
            return Err(Error::validation("template name must not be empty"));
        }
        if self
            .store()
            .get_worker_type(&draft.worker_type_id)
            .await?
            .is_none()
        {
            return Err(Error::not_found(format!(
                "worker type {}",
                draft.worker_type_id
            )));
        }
        if !draft.default_inputs.trim().is_empty() {
            parse_inputs(&draft.default_inputs)?;
        }
        let template = self.store().insert_template(&draft).await?;
        info!(template_id = %template.id, name = %template.name, "template created");
        Ok(template)
    }

    pub async fn get_template(&self, id: &str) -> Result<TaskTemplate> {
        self.store()
            .get_template(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("template {id}")))
    }

    pub async fn list_templates(&self) -> Result<Vec<TaskTemplate>> {
        self.store().list_templates().await
    }

    pub async fn update_template(&self, template: &TaskTemplate) -> Result<TaskTemplate> {
        if !template.default_inputs.trim().is_empty() {
            parse_inputs(&template.default_inputs)?;
        }
        if !self.store().update_template(template).await? {
            return Err(Error::not_found(format!("template {}", template.id)));
        }
        self.get_template(&template.id).await
    }

    pub async fn delete_template(&self, id: &str, actor: Option<&str>) -> Result<()> {
        if !self.store().soft_delete_template(id, actor).await? {
            return Err(Error::not_found(format!("template {id}")));
        }
        info!(template_id = %id, "template deleted");
        Ok(())
    }

    /// Instantiate a task from a template.
    ///
    /// Merges the template's default inputs with `overrides` (override wins
    /// on key conflict), then inserts the task, one input record per merged
    /// key, and — when the template carries an expiration — a cleanup entry,
    /// all in one transaction. On any failure nothing persists.
    pub async fn create_task_from_template(
        &self,
        template_id: &str,
        overrides: Option<Map<String, Value>>,
        scheduled_for: Option<i64>,
    ) -> Result<Task> {
        let template = self.get_template(template_id).await?;
        let worker_type = self
            .store()
            .get_worker_type(&template.worker_type_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("worker type {}", template.worker_type_id)))?;

        let mut merged = if template.default_inputs.trim().is_empty() {
            Map::new()
        } else {
            parse_inputs(&template.default_inputs)?
        };
        if let Some(overrides) = overrides {
            for (key, value) in overrides {
                merged.insert(key, value);
            }
        }

        let payload = serde_json::to_string(&merged)?;
        let mut inputs = Vec::with_capacity(merged.len());
        for (key, value) in &merged {
            inputs.push((key.clone(), serde_json::to_string(value)?));
        }

        let cleanup_expires_at = if template.expiration_secs > 0 {
            Some(now_ts() + template.expiration_secs)
        } else {
            None
        };

        let draft = TaskDraft {
            task_type: worker_type.name.clone(),
            payload,
            template_id: Some(template.id.clone()),
            scheduled_for,
            ..TaskDraft::default()
        };
        let task = self
            .store()
            .insert_task_with_inputs(&draft, Status::Pending, &inputs, cleanup_expires_at)
            .await?;
        info!(
            task_id = %task.id,
            template_id = %template.id,
            inputs = inputs.len(),
            "task instantiated from template"
        );
        Ok(task)
    }

    /// Soft-delete tasks whose cleanup entries have expired. Per-entry
    /// failures are logged and skipped so one bad record cannot stall the
    /// pass. Returns the number of tasks purged.
    pub async fn run_cleanup_pass(&self, now: i64) -> Result<usize> {
        let due = self.store().due_cleanups(now).await?;
        let mut purged = 0;
        for entry in due {
            match self.store().purge_task(&entry.id, &entry.task_id, now).await {
                Ok(()) => purged += 1,
                Err(e) => {
                    warn!(task_id = %entry.task_id, error = %e, "cleanup purge failed")
                }
            }
        }
        if purged > 0 {
            info!(purged, "cleanup pass purged expired tasks");
        }
        Ok(purged)
    }
}

/// Parse a default-inputs document; it must be a JSON object.
fn parse_inputs(doc: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(doc)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::validation("inputs document must be a JSON object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::memory_manager;
    use crate::model::TaskFilter;

    async fn seeded(m: &Manager, default_inputs: &str, expiration_secs: i64) -> TaskTemplate {
        let wt = m.create_worker_type("send_email", "mailer").await.unwrap();
        m.create_template(TemplateDraft {
            name: "welcome-mail".to_string(),
            worker_type_id: wt.id,
            default_inputs: default_inputs.to_string(),
            expiration_secs,
            ..TemplateDraft::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn overrides_win_and_each_key_becomes_an_input() {
        let m = memory_manager().await;
        let tpl = seeded(&m, r#"{"subject":"hello","retry":3}"#, 0).await;

        let mut overrides = Map::new();
        overrides.insert("retry".to_string(), Value::from(5));
        overrides.insert("recipient".to_string(), Value::from("a@b.com"));

        let task = m
            .create_task_from_template(&tpl.id, Some(overrides), None)
            .await
            .unwrap();

        assert_eq!(task.task_type, "send_email");
        assert_eq!(task.status, Status::Pending);
        assert_eq!(task.template_id.as_deref(), Some(tpl.id.as_str()));

        let payload: Map<String, Value> = serde_json::from_str(&task.payload).unwrap();
        assert_eq!(payload["subject"], Value::from("hello"));
        assert_eq!(payload["retry"], Value::from(5));
        assert_eq!(payload["recipient"], Value::from("a@b.com"));

        let inputs = m.store().task_inputs(&task.id).await.unwrap();
        assert_eq!(inputs.len(), 3);
    }

    #[tokio::test]
    async fn missing_template_persists_nothing() {
        let m = memory_manager().await;
        let err = m
            .create_task_from_template("no-such-template", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let tasks = m.get_tasks(&TaskFilter::default(), 0, 0).await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn empty_inputs_skip_input_records() {
        let m = memory_manager().await;
        let tpl = seeded(&m, "", 0).await;
        let task = m
            .create_task_from_template(&tpl.id, None, Some(1234))
            .await
            .unwrap();
        assert_eq!(task.scheduled_for, Some(1234));
        assert!(m.store().task_inputs(&task.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expiring_template_schedules_cleanup_and_pass_purges() {
        let m = memory_manager().await;
        let tpl = seeded(&m, r#"{"k":"v"}"#, 60).await;
        let task = m
            .create_task_from_template(&tpl.id, None, None)
            .await
            .unwrap();

        // nothing due yet
        assert_eq!(m.run_cleanup_pass(now_ts()).await.unwrap(), 0);
        assert!(m.get_task(&task.id).await.is_ok());

        // well past expiry
        assert_eq!(m.run_cleanup_pass(now_ts() + 3600).await.unwrap(), 1);
        assert!(matches!(
            m.get_task(&task.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        // a second pass finds nothing
        assert_eq!(m.run_cleanup_pass(now_ts() + 3600).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn template_crud_round_trip() {
        let m = memory_manager().await;
        let mut tpl = seeded(&m, r#"{"a":1}"#, 0).await;

        tpl.cron_schedule = "*/5 * * * *".to_string();
        tpl.is_recurring = true;
        let updated = m.update_template(&tpl).await.unwrap();
        assert!(updated.is_recurring);
        assert_eq!(updated.cron_schedule, "*/5 * * * *");

        m.delete_template(&tpl.id, None).await.unwrap();
        assert!(matches!(
            m.get_template(&tpl.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(m.list_templates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_unknown_worker_type_and_bad_inputs() {
        let m = memory_manager().await;
        let err = m
            .create_template(TemplateDraft {
                name: "x".to_string(),
                worker_type_id: "ghost".to_string(),
                ..TemplateDraft::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let wt = m.create_worker_type("w", "").await.unwrap();
        let err = m
            .create_template(TemplateDraft {
                name: "y".to_string(),
                worker_type_id: wt.id,
                default_inputs: "[1,2]".to_string(),
                ..TemplateDraft::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
