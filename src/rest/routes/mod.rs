pub mod health;
pub mod queue;
pub mod tasks;
pub mod templates;
pub mod workers;
