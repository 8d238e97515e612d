// rest/routes/templates.rs — template CRUD and instantiation routes.
//
// Create, update, and delete all notify the scheduler so cron edits take
// effect without a restart.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::model::{Task, TaskTemplate, TemplateDraft};
use crate::rest::{api_error, ApiError};
use crate::AppContext;

pub async fn list_templates(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<Value>, ApiError> {
    let templates = ctx.manager.list_templates().await.map_err(api_error)?;
    Ok(Json(json!({ "templates": templates })))
}

pub async fn create_template(
    State(ctx): State<Arc<AppContext>>,
    Json(draft): Json<TemplateDraft>,
) -> Result<(StatusCode, Json<TaskTemplate>), ApiError> {
    let template = ctx.manager.create_template(draft).await.map_err(api_error)?;
    ctx.scheduler
        .on_template_changed(&template)
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn get_template(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<TaskTemplate>, ApiError> {
    Ok(Json(ctx.manager.get_template(&id).await.map_err(api_error)?))
}

#[derive(Deserialize)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub worker_type_id: Option<String>,
    pub is_recurring: Option<bool>,
    pub cron_schedule: Option<String>,
    pub expiration_secs: Option<i64>,
    pub default_inputs: Option<String>,
    pub updated_by: Option<String>,
}

pub async fn update_template(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateTemplateRequest>,
) -> Result<Json<TaskTemplate>, ApiError> {
    let mut template = ctx.manager.get_template(&id).await.map_err(api_error)?;
    if let Some(name) = body.name {
        template.name = name;
    }
    if let Some(description) = body.description {
        template.description = description;
    }
    if let Some(worker_type_id) = body.worker_type_id {
        template.worker_type_id = worker_type_id;
    }
    if let Some(is_recurring) = body.is_recurring {
        template.is_recurring = is_recurring;
    }
    if let Some(cron_schedule) = body.cron_schedule {
        template.cron_schedule = cron_schedule;
    }
    if let Some(expiration_secs) = body.expiration_secs {
        template.expiration_secs = expiration_secs;
    }
    if let Some(default_inputs) = body.default_inputs {
        template.default_inputs = default_inputs;
    }
    template.updated_by = body.updated_by;

    let updated = ctx
        .manager
        .update_template(&template)
        .await
        .map_err(api_error)?;
    ctx.scheduler
        .on_template_changed(&updated)
        .map_err(api_error)?;
    Ok(Json(updated))
}

pub async fn delete_template(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.manager
        .delete_template(&id, None)
        .await
        .map_err(api_error)?;
    ctx.scheduler.on_template_deleted(&id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
pub struct InstantiateRequest {
    pub overrides: Option<Map<String, Value>>,
    pub scheduled_for: Option<i64>,
}

pub async fn instantiate_template(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    body: Option<Json<InstantiateRequest>>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let task = ctx
        .manager
        .create_task_from_template(&id, body.overrides, body.scheduled_for)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(task)))
}
