//! Timer registry: cron-expression-driven callback firing.
//!
//! [`TimerRegistry`] is the seam between the schedule reconciler and
//! whatever actually keeps time. [`CronTimers`] is the shipped
//! implementation: one spawned loop that sleeps until the earliest
//! registered expression is due, woken early whenever the registration set
//! changes.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Error, Result};

pub type TimerId = u64;

/// Fired on the timer loop; must not block. Long work is spawned.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

pub trait TimerRegistry: Send + Sync {
    /// Register a callback under a cron expression. Fails with Validation
    /// when the expression does not parse.
    fn register(&self, expression: &str, callback: TimerCallback) -> Result<TimerId>;

    /// Remove a registration. Unknown ids are a no-op.
    fn cancel(&self, id: TimerId);

    /// Start the firing loop. Idempotent; later calls do nothing.
    fn start(&self);
}

struct TimerEntry {
    schedule: Schedule,
    next_fire: Option<DateTime<Utc>>,
    callback: TimerCallback,
}

struct Inner {
    timers: Mutex<HashMap<TimerId, TimerEntry>>,
    next_id: AtomicU64,
    started: AtomicBool,
    changed: Notify,
}

#[derive(Clone)]
pub struct CronTimers {
    inner: Arc<Inner>,
}

impl Default for CronTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl CronTimers {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                timers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                started: AtomicBool::new(false),
                changed: Notify::new(),
            }),
        }
    }

    async fn run(inner: Arc<Inner>) {
        loop {
            let next_due = {
                let timers = inner.timers.lock().unwrap_or_else(|e| e.into_inner());
                timers.values().filter_map(|e| e.next_fire).min()
            };

            match next_due {
                None => inner.changed.notified().await,
                Some(due) => {
                    let wait = (due - Utc::now())
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => Self::fire_due(&inner),
                        // registration set changed, recompute the earliest due
                        _ = inner.changed.notified() => {}
                    }
                }
            }
        }
    }

    /// Collect callbacks under the lock, invoke them outside it.
    fn fire_due(inner: &Inner) {
        let now = Utc::now();
        let mut due: Vec<TimerCallback> = Vec::new();
        {
            let mut timers = inner.timers.lock().unwrap_or_else(|e| e.into_inner());
            for entry in timers.values_mut() {
                if matches!(entry.next_fire, Some(t) if t <= now) {
                    due.push(entry.callback.clone());
                    entry.next_fire = entry.schedule.after(&now).next();
                }
            }
        }
        for callback in due {
            callback();
        }
    }
}

impl TimerRegistry for CronTimers {
    fn register(&self, expression: &str, callback: TimerCallback) -> Result<TimerId> {
        let schedule = parse_expression(expression)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let next_fire = schedule.after(&Utc::now()).next();
        {
            let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
            timers.insert(
                id,
                TimerEntry {
                    schedule,
                    next_fire,
                    callback,
                },
            );
        }
        debug!(timer_id = id, expression, "timer registered");
        self.inner.changed.notify_one();
        Ok(id)
    }

    fn cancel(&self, id: TimerId) {
        let removed = {
            let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
            timers.remove(&id).is_some()
        };
        if removed {
            debug!(timer_id = id, "timer cancelled");
            self.inner.changed.notify_one();
        }
    }

    fn start(&self) {
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            tokio::spawn(Self::run(self.inner.clone()));
        }
    }
}

/// Parse a cron expression, accepting the common 5-field minute-resolution
/// form by defaulting the seconds field to 0.
fn parse_expression(expression: &str) -> Result<Schedule> {
    let expression = expression.trim();
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|e| Error::validation(format!("cron expression {expression:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn five_field_expressions_are_accepted() {
        assert!(parse_expression("*/5 * * * *").is_ok());
        assert!(parse_expression("0 0 * * * *").is_ok());
        assert!(matches!(
            parse_expression("not a cron"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            parse_expression("99 * * * *"),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn cancel_removes_a_registration() {
        let timers = CronTimers::new();
        let id = timers
            .register("*/5 * * * *", Arc::new(|| {}))
            .unwrap();
        timers.cancel(id);
        let remaining = timers
            .inner
            .timers
            .lock()
            .unwrap()
            .len();
        assert_eq!(remaining, 0);
        // cancelling again is a no-op
        timers.cancel(id);
    }

    #[tokio::test]
    async fn started_loop_fires_a_due_timer() {
        let timers = CronTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        // every second
        timers
            .register("* * * * * *", Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        timers.start();
        timers.start(); // second start must not double the loop

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let count = fired.load(Ordering::SeqCst);
        assert!(count >= 1, "timer never fired");
        assert!(count <= 3, "timer fired too often: {count}");
    }
}
