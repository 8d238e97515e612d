// rest/routes/tasks.rs — task lifecycle routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::model::{Status, Task, TaskDraft, TaskFilter, TaskNode};
use crate::rest::{api_error, ApiError};
use crate::AppContext;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub status: Option<Status>,
    pub reference_id: Option<String>,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

pub async fn list_tasks(
    State(ctx): State<Arc<AppContext>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = TaskFilter {
        task_type: q.task_type,
        status: q.status,
        reference_id: q.reference_id,
    };
    let tasks = ctx
        .manager
        .get_tasks(&filter, q.limit, q.offset)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "tasks": tasks })))
}

pub async fn create_task(
    State(ctx): State<Arc<AppContext>>,
    Json(draft): Json<TaskDraft>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = ctx.manager.create_task(draft).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(ctx.manager.get_task(&id).await.map_err(api_error)?))
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub reference_id: Option<String>,
    pub payload: Option<String>,
    pub result: Option<String>,
    pub scheduled_for: Option<i64>,
    pub items_total: Option<i64>,
    pub items_impacted: Option<i64>,
    pub items_failed: Option<i64>,
    pub updated_by: Option<String>,
}

pub async fn update_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    let mut task = ctx.manager.get_task(&id).await.map_err(api_error)?;
    if body.reference_id.is_some() {
        task.reference_id = body.reference_id;
    }
    if let Some(payload) = body.payload {
        task.payload = payload;
    }
    if let Some(result) = body.result {
        task.result = result;
    }
    if body.scheduled_for.is_some() {
        task.scheduled_for = body.scheduled_for;
    }
    if let Some(v) = body.items_total {
        task.items_total = v;
    }
    if let Some(v) = body.items_impacted {
        task.items_impacted = v;
    }
    if let Some(v) = body.items_failed {
        task.items_failed = v;
    }
    task.updated_by = body.updated_by;
    let updated = ctx.manager.update_task(&task).await.map_err(api_error)?;
    Ok(Json(updated))
}

pub async fn delete_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.manager
        .delete_task(&id, None)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reserve_task(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(ctx.manager.reserve().await.map_err(api_error)?))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Status,
}

pub async fn update_status(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<Task>, ApiError> {
    let task = ctx
        .manager
        .update_status(&id, body.status)
        .await
        .map_err(api_error)?;
    Ok(Json(task))
}

pub async fn cancel_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(ctx.manager.cancel_task(&id).await.map_err(api_error)?))
}

pub async fn retry_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let retry = ctx.manager.retry_task(&id).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(retry)))
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub success: bool,
}

pub async fn complete_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<Task>, ApiError> {
    let task = ctx
        .manager
        .complete(&id, body.success)
        .await
        .map_err(api_error)?;
    Ok(Json(task))
}

pub async fn child_tasks(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    // 404 for unknown parents rather than an empty list
    ctx.manager.get_task(&id).await.map_err(api_error)?;
    let children = ctx.manager.child_tasks(&id).await.map_err(api_error)?;
    Ok(Json(json!({ "tasks": children })))
}

pub async fn task_tree(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<TaskNode>, ApiError> {
    Ok(Json(ctx.manager.task_tree(&id).await.map_err(api_error)?))
}
