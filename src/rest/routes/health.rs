// rest/routes/health.rs — liveness probe.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::model::now_ts;
use crate::AppContext;

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": now_ts() - ctx.started_at,
    }))
}
