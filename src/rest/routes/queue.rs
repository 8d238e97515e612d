// rest/routes/queue.rs — job queue and dead-letter routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::model::{DeadLetterEntry, JobQueueEntry};
use crate::rest::{api_error, ApiError};
use crate::AppContext;

pub async fn list_jobs(State(ctx): State<Arc<AppContext>>) -> Result<Json<Value>, ApiError> {
    let jobs = ctx.manager.list_jobs().await.map_err(api_error)?;
    Ok(Json(json!({ "jobs": jobs })))
}

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub task_id: String,
    pub worker_id: Option<String>,
}

pub async fn enqueue_job(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<JobQueueEntry>), ApiError> {
    let entry = ctx
        .manager
        .enqueue_job(&body.task_id, body.worker_id.as_deref())
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn dequeue_job(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.manager.dequeue_job(&id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_dead_letters(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<Value>, ApiError> {
    let entries = ctx.manager.list_dead_letters().await.map_err(api_error)?;
    Ok(Json(json!({ "dead_letters": entries })))
}

#[derive(Deserialize)]
pub struct DeadLetterRequest {
    pub task_id: String,
    pub worker_id: Option<String>,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub retry_count: i64,
}

pub async fn record_dead_letter(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<DeadLetterRequest>,
) -> Result<(StatusCode, Json<DeadLetterEntry>), ApiError> {
    let entry = ctx
        .manager
        .record_dead_letter(
            &body.task_id,
            body.worker_id.as_deref(),
            &body.error_message,
            body.retry_count,
        )
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(entry)))
}
