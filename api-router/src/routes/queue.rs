use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use common::{error::AppError, storage::types::queue_task::QueueTask};

use crate::{
    api_state::ApiState,
    error::ApiError,
    jsonapi::{Document, Resource},
};

#[derive(Debug, Serialize)]
pub struct QueueTaskAttributes {
    pub dedup_key: String,
    pub task_type: String,
    pub priority: i64,
    pub payload: serde_json::Value,
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn task_resource(task: &QueueTask) -> Resource<QueueTaskAttributes> {
    Resource::new(
        "queue_task",
        &task.id,
        QueueTaskAttributes {
            dedup_key: task.dedup_key.clone(),
            task_type: task.task_type.clone(),
            priority: task.priority,
            payload: task.payload.clone(),
            claimed_by: task.claimed_by.clone(),
            lease_expires_at: task.lease_expires_at,
            created_at: task.created_at,
        },
    )
}

pub async fn list_queue(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let tasks = QueueTask::list(&state.db).await?;
    let resources: Vec<Resource<QueueTaskAttributes>> = tasks.iter().map(task_resource).collect();

    Ok(Json(Document::new(resources)))
}

pub async fn get_queue_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = QueueTask::get(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("queue task {id}")))?;

    Ok(Json(Document::new(task_resource(&task))))
}
