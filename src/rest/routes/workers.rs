// rest/routes/workers.rs — worker-type administration and worker
// registration/heartbeat routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::model::{WorkerHeartbeat, WorkerRegistration, WorkerType};
use crate::rest::{api_error, ApiError};
use crate::AppContext;

pub async fn list_worker_types(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<Value>, ApiError> {
    let types = ctx.manager.list_worker_types().await.map_err(api_error)?;
    Ok(Json(json!({ "worker_types": types })))
}

#[derive(Deserialize)]
pub struct CreateWorkerTypeRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

pub async fn create_worker_type(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CreateWorkerTypeRequest>,
) -> Result<(StatusCode, Json<WorkerType>), ApiError> {
    let wt = ctx
        .manager
        .create_worker_type(&body.name, &body.description)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(wt)))
}

pub async fn get_worker_type(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<WorkerType>, ApiError> {
    Ok(Json(
        ctx.manager.get_worker_type(&id).await.map_err(api_error)?,
    ))
}

pub async fn delete_worker_type(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.manager
        .delete_worker_type(&id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct RegisterWorkerRequest {
    pub worker_type_id: String,
    pub host_name: String,
}

pub async fn register_worker(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<RegisterWorkerRequest>,
) -> Result<(StatusCode, Json<WorkerRegistration>), ApiError> {
    let registration = ctx
        .manager
        .register_worker(&body.worker_type_id, &body.host_name)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(registration)))
}

pub async fn worker_heartbeat(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<WorkerHeartbeat>, ApiError> {
    Ok(Json(
        ctx.manager.worker_heartbeat(&id).await.map_err(api_error)?,
    ))
}
