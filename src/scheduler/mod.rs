//! Schedule reconciler: keeps the timer registry in sync with the set of
//! recurring templates, and instantiates a task on every firing.

pub mod timers;

pub use timers::{CronTimers, TimerCallback, TimerId, TimerRegistry};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::Result;
use crate::manager::TemplateRunner;
use crate::model::{now_ts, TaskTemplate};

/// Maps template id → active timer registration. The map is only touched
/// under its lock, which is never held across an await.
pub struct Scheduler {
    runner: Arc<dyn TemplateRunner>,
    timers: Arc<dyn TimerRegistry>,
    entries: Mutex<HashMap<String, TimerId>>,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn TemplateRunner>, timers: Arc<dyn TimerRegistry>) -> Self {
        Self {
            runner,
            timers,
            entries: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Full reload, then start the firing loop. A second call only reloads.
    pub async fn start(&self) -> Result<()> {
        self.reload_templates().await?;
        if !self.started.swap(true, Ordering::SeqCst) {
            self.timers.start();
            info!("scheduler started");
        }
        Ok(())
    }

    /// Full resync: drop every registration and rebuild from the
    /// authoritative template set. Templates that do not qualify (not
    /// recurring, blank expression) are skipped; ones with an expression
    /// that no longer parses are logged and skipped so the rest of the set
    /// still loads.
    pub async fn reload_templates(&self) -> Result<()> {
        let templates = self.runner.task_templates().await?;

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for (_, timer_id) in entries.drain() {
            self.timers.cancel(timer_id);
        }
        let mut registered = 0;
        for template in &templates {
            if !qualifies(template) {
                continue;
            }
            match self.register(template) {
                Ok(timer_id) => {
                    entries.insert(template.id.clone(), timer_id);
                    registered += 1;
                }
                Err(e) => {
                    warn!(template_id = %template.id, error = %e, "skipping unschedulable template")
                }
            }
        }
        info!(registered, total = templates.len(), "schedules reloaded");
        Ok(())
    }

    /// Incremental reconciliation after a template create/update: the old
    /// registration (if any) is dropped, and a new one is made only if the
    /// template still qualifies. An invalid cron expression is reported to
    /// the caller.
    pub fn on_template_changed(&self, template: &TaskTemplate) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer_id) = entries.remove(&template.id) {
            self.timers.cancel(timer_id);
        }
        if qualifies(template) {
            let timer_id = self.register(template)?;
            entries.insert(template.id.clone(), timer_id);
        }
        Ok(())
    }

    pub fn on_template_deleted(&self, id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer_id) = entries.remove(id) {
            self.timers.cancel(timer_id);
        }
    }

    fn register(&self, template: &TaskTemplate) -> Result<TimerId> {
        let runner = self.runner.clone();
        let template_id = template.id.clone();
        let callback: TimerCallback = Arc::new(move || {
            let runner = runner.clone();
            let template_id = template_id.clone();
            // Instantiation failures never reach the timer loop.
            tokio::spawn(async move {
                match runner
                    .create_task_from_template(&template_id, None, Some(now_ts()))
                    .await
                {
                    Ok(task) => {
                        info!(template_id = %template_id, task_id = %task.id, "scheduled task created")
                    }
                    Err(e) => {
                        warn!(template_id = %template_id, error = %e, "scheduled instantiation failed")
                    }
                }
            });
        });
        self.timers.register(&template.cron_schedule, callback)
    }

    #[cfg(test)]
    fn registration_for(&self, template_id: &str) -> Option<TimerId> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(template_id)
            .copied()
    }
}

fn qualifies(template: &TaskTemplate) -> bool {
    template.is_recurring && !template.cron_schedule.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    use crate::error::Error;
    use crate::model::Task;

    /// Registry that records registrations instead of keeping time.
    #[derive(Default)]
    struct RecordingRegistry {
        next_id: AtomicU64,
        live: Mutex<HashMap<TimerId, (String, TimerCallback)>>,
        start_calls: AtomicU64,
    }

    impl RecordingRegistry {
        fn live_ids(&self) -> Vec<TimerId> {
            let mut ids: Vec<_> = self.live.lock().unwrap().keys().copied().collect();
            ids.sort();
            ids
        }

        fn fire(&self, id: TimerId) {
            let callback = self.live.lock().unwrap().get(&id).map(|(_, cb)| cb.clone());
            if let Some(cb) = callback {
                cb();
            }
        }
    }

    impl TimerRegistry for RecordingRegistry {
        fn register(&self, expression: &str, callback: TimerCallback) -> Result<TimerId> {
            if expression.contains("bad") {
                return Err(Error::validation("bad expression"));
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            self.live
                .lock()
                .unwrap()
                .insert(id, (expression.to_string(), callback));
            Ok(id)
        }

        fn cancel(&self, id: TimerId) {
            self.live.lock().unwrap().remove(&id);
        }

        fn start(&self) {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Runner backed by a fixed template set, recording instantiations.
    #[derive(Default)]
    struct StubRunner {
        templates: Mutex<Vec<TaskTemplate>>,
        created: Mutex<Vec<(String, Option<i64>)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl TemplateRunner for StubRunner {
        async fn task_templates(&self) -> Result<Vec<TaskTemplate>> {
            Ok(self.templates.lock().unwrap().clone())
        }

        async fn create_task_from_template(
            &self,
            template_id: &str,
            _overrides: Option<Map<String, Value>>,
            scheduled_for: Option<i64>,
        ) -> Result<Task> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::not_found(format!("template {template_id}")));
            }
            self.created
                .lock()
                .unwrap()
                .push((template_id.to_string(), scheduled_for));
            Ok(stub_task())
        }
    }

    fn stub_task() -> Task {
        Task {
            id: crate::model::new_id(),
            friendly_id: 1,
            task_type: "stub".to_string(),
            reference_id: None,
            status: crate::model::Status::Pending,
            payload: String::new(),
            result: String::new(),
            template_id: None,
            parent_task_id: None,
            attempt: 0,
            scheduled_for: None,
            started_at: None,
            items_total: 0,
            items_impacted: 0,
            items_failed: 0,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
            created_by: None,
            updated_by: None,
            deleted_by: None,
        }
    }

    fn template(id: &str, recurring: bool, cron: &str) -> TaskTemplate {
        TaskTemplate {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            worker_type_id: "wt".to_string(),
            is_recurring: recurring,
            cron_schedule: cron.to_string(),
            expiration_secs: 0,
            default_inputs: String::new(),
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
            created_by: None,
            updated_by: None,
            deleted_by: None,
        }
    }

    fn scheduler_with(
        templates: Vec<TaskTemplate>,
    ) -> (Scheduler, Arc<RecordingRegistry>, Arc<StubRunner>) {
        let runner = Arc::new(StubRunner::default());
        *runner.templates.lock().unwrap() = templates;
        let registry = Arc::new(RecordingRegistry::default());
        let scheduler = Scheduler::new(runner.clone(), registry.clone());
        (scheduler, registry, runner)
    }

    #[tokio::test]
    async fn start_registers_only_qualifying_templates() {
        let (scheduler, registry, _) = scheduler_with(vec![
            template("recurring", true, "*/5 * * * *"),
            template("one-shot", false, "*/5 * * * *"),
            template("blank", true, "  "),
            template("broken", true, "bad expr"),
        ]);
        scheduler.start().await.unwrap();

        assert_eq!(registry.live_ids().len(), 1);
        assert!(scheduler.registration_for("recurring").is_some());
        assert!(scheduler.registration_for("one-shot").is_none());
        assert!(scheduler.registration_for("blank").is_none());
        assert!(scheduler.registration_for("broken").is_none());
    }

    #[tokio::test]
    async fn second_start_reloads_without_restarting_the_loop() {
        let (scheduler, registry, _) =
            scheduler_with(vec![template("a", true, "*/5 * * * *")]);
        scheduler.start().await.unwrap();
        let first = scheduler.registration_for("a").unwrap();

        scheduler.start().await.unwrap();
        let second = scheduler.registration_for("a").unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.live_ids().len(), 1);
        assert_eq!(registry.start_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changed_template_replaces_its_registration() {
        let (scheduler, registry, _) =
            scheduler_with(vec![template("a", true, "*/5 * * * *")]);
        scheduler.start().await.unwrap();
        let before = scheduler.registration_for("a").unwrap();

        scheduler
            .on_template_changed(&template("a", true, "0 * * * *"))
            .unwrap();
        let after = scheduler.registration_for("a").unwrap();
        assert_ne!(before, after);
        assert_eq!(registry.live_ids(), vec![after]);

        // flipping recurring off removes the registration entirely
        scheduler
            .on_template_changed(&template("a", false, "0 * * * *"))
            .unwrap();
        assert!(scheduler.registration_for("a").is_none());
        assert!(registry.live_ids().is_empty());
    }

    #[tokio::test]
    async fn changed_template_with_invalid_expression_errors() {
        let (scheduler, _, _) = scheduler_with(vec![]);
        let err = scheduler
            .on_template_changed(&template("a", true, "bad expr"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(scheduler.registration_for("a").is_none());
    }

    #[tokio::test]
    async fn deleted_template_is_unregistered() {
        let (scheduler, registry, _) =
            scheduler_with(vec![template("a", true, "*/5 * * * *")]);
        scheduler.start().await.unwrap();
        scheduler.on_template_deleted("a");
        assert!(registry.live_ids().is_empty());
        // deleting an unknown id is a no-op
        scheduler.on_template_deleted("ghost");
    }

    #[tokio::test]
    async fn firing_instantiates_with_current_time_and_survives_failure() {
        let (scheduler, registry, runner) =
            scheduler_with(vec![template("a", true, "*/5 * * * *")]);
        scheduler.start().await.unwrap();
        let timer_id = scheduler.registration_for("a").unwrap();

        registry.fire(timer_id);
        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let created = runner.created.lock().unwrap();
            assert_eq!(created.len(), 1);
            assert_eq!(created[0].0, "a");
            assert!(created[0].1.is_some());
        }

        // a failing instantiation is swallowed; the next firing still works
        runner.fail.store(true, Ordering::SeqCst);
        registry.fire(timer_id);
        tokio::time::sleep(Duration::from_millis(50)).await;
        runner.fail.store(false, Ordering::SeqCst);
        registry.fire(timer_id);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.created.lock().unwrap().len(), 2);
    }
}
