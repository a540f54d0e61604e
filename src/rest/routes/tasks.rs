// rest/routes/tasks.rs — Task CRUD routes.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::rest::error::ApiError;
use crate::storage::TaskRow;
use crate::AppContext;

pub async fn list_tasks(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<Vec<TaskRow>>, ApiError> {
    let rows = ctx.storage.list_tasks().await?;
    Ok(Json(rows))
}

/// Reads keep row-set semantics: an unknown id answers 200 with an empty
/// array rather than 404.
pub async fn read_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<TaskRow>>, ApiError> {
    let rows = ctx.storage.get_task_rows(id).await?;
    Ok(Json(rows))
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub task: Option<String>,
    pub status: Option<String>,
}

pub async fn create_task(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<Json<Value>, ApiError> {
    let task = body.task.as_deref().unwrap_or("");
    let status = body.status.as_deref().unwrap_or("");
    // Absent and empty are rejected alike.
    if task.is_empty() || status.is_empty() {
        return Err(ApiError::MissingFields);
    }

    let id = ctx.storage.create_task(task, status).await?;
    Ok(Json(json!({ "id": id })))
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub task: String,
    /// Accepted in the body but never written — update touches only `task`.
    pub status: String,
}

pub async fn update_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateTaskRequest>,
) -> Result<Json<Value>, ApiError> {
    let affected = ctx.storage.update_task(id, &body.task).await?;
    Ok(Json(json!({ "affected_rows": affected })))
}

pub async fn delete_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    ctx.storage.delete_task(id).await?;
    Ok(Json(json!({ "message": "Task successfully deleted" })))
}
