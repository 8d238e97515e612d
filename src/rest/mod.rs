// rest/mod.rs — HTTP surface over the orchestration core.
//
// Thin translation layer: every handler maps a request onto one manager or
// scheduler call and renders the result. No business logic lives here.
//
// Endpoints:
//   GET  /api/v1/health
//   GET|POST /api/v1/tasks            POST /api/v1/tasks/reserve
//   GET|PUT|DELETE /api/v1/tasks/{id}
//   POST /api/v1/tasks/{id}/cancel|retry|complete   PUT .../status
//   GET  /api/v1/tasks/{id}/children|tree
//   GET|POST /api/v1/templates        GET|PUT|DELETE /api/v1/templates/{id}
//   POST /api/v1/templates/{id}/instantiate
//   GET|POST /api/v1/worker-types     GET|DELETE /api/v1/worker-types/{id}
//   POST /api/v1/workers/register     POST /api/v1/workers/{id}/heartbeat
//   GET|POST /api/v1/queue            DELETE /api/v1/queue/{id}
//   GET|POST /api/v1/deadletters

pub mod routes;

use anyhow::Result;
use axum::{
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::error::Error;
use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::health::health))
        // Tasks
        .route(
            "/api/v1/tasks",
            get(routes::tasks::list_tasks).post(routes::tasks::create_task),
        )
        .route("/api/v1/tasks/reserve", post(routes::tasks::reserve_task))
        .route(
            "/api/v1/tasks/{id}",
            get(routes::tasks::get_task)
                .put(routes::tasks::update_task)
                .delete(routes::tasks::delete_task),
        )
        .route("/api/v1/tasks/{id}/status", put(routes::tasks::update_status))
        .route("/api/v1/tasks/{id}/cancel", post(routes::tasks::cancel_task))
        .route("/api/v1/tasks/{id}/retry", post(routes::tasks::retry_task))
        .route(
            "/api/v1/tasks/{id}/complete",
            post(routes::tasks::complete_task),
        )
        .route(
            "/api/v1/tasks/{id}/children",
            get(routes::tasks::child_tasks),
        )
        .route("/api/v1/tasks/{id}/tree", get(routes::tasks::task_tree))
        // Templates
        .route(
            "/api/v1/templates",
            get(routes::templates::list_templates).post(routes::templates::create_template),
        )
        .route(
            "/api/v1/templates/{id}",
            get(routes::templates::get_template)
                .put(routes::templates::update_template)
                .delete(routes::templates::delete_template),
        )
        .route(
            "/api/v1/templates/{id}/instantiate",
            post(routes::templates::instantiate_template),
        )
        // Workers
        .route(
            "/api/v1/worker-types",
            get(routes::workers::list_worker_types).post(routes::workers::create_worker_type),
        )
        .route(
            "/api/v1/worker-types/{id}",
            get(routes::workers::get_worker_type).delete(routes::workers::delete_worker_type),
        )
        .route(
            "/api/v1/workers/register",
            post(routes::workers::register_worker),
        )
        .route(
            "/api/v1/workers/{id}/heartbeat",
            post(routes::workers::worker_heartbeat),
        )
        // Queue & dead letters
        .route(
            "/api/v1/queue",
            get(routes::queue::list_jobs).post(routes::queue::enqueue_job),
        )
        .route("/api/v1/queue/{id}", axum::routing::delete(routes::queue::dequeue_job))
        .route(
            "/api/v1/deadletters",
            get(routes::queue::list_dead_letters).post(routes::queue::record_dead_letter),
        )
        .with_state(ctx)
}

pub(crate) type ApiError = (StatusCode, Json<Value>);

/// Map the core error taxonomy onto HTTP outcomes.
pub(crate) fn api_error(e: Error) -> ApiError {
    let status = match &e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Persistence(_) | Error::Scheduling(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}
