//! taskforge — task-orchestration core.
//!
//! Tasks move through a lifecycle (pending → in_progress → terminal),
//! can be instantiated from reusable templates, and recurring templates
//! auto-create tasks on a cron schedule that is editable at runtime.

pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod rest;
pub mod scheduler;
pub mod store;

pub use error::{Error, Result};

use std::sync::Arc;

use config::ForgeConfig;
use manager::Manager;
use scheduler::Scheduler;

/// Shared state handed to every REST handler.
pub struct AppContext {
    pub config: ForgeConfig,
    pub manager: Manager,
    pub scheduler: Arc<Scheduler>,
    pub started_at: i64,
}
