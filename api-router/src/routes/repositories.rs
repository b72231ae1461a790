use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use common::storage::types::{
    repository::{Repository, TrackingConfig},
    task_status::TaskStatus,
};

use crate::{
    api_state::ApiState,
    error::ApiError,
    jsonapi::{Document, NewResource, Resource},
};

#[derive(Debug, Serialize)]
pub struct RepositoryAttributes {
    pub remote_uri: String,
    pub sanitized_uri: String,
    pub clone_path: Option<String>,
    pub num_commits: u64,
    pub num_branches: u64,
    pub num_tags: u64,
    pub tracking: TrackingConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Repository> for RepositoryAttributes {
    fn from(repository: &Repository) -> Self {
        Self {
            remote_uri: repository.remote_uri.clone(),
            sanitized_uri: repository.sanitized_uri.clone(),
            clone_path: repository.clone_path.clone(),
            num_commits: repository.num_commits,
            num_branches: repository.num_branches,
            num_tags: repository.num_tags,
            tracking: repository.tracking.clone(),
            created_at: repository.created_at,
            updated_at: repository.updated_at,
        }
    }
}

fn repository_resource(repository: &Repository) -> Resource<RepositoryAttributes> {
    Resource::new("repository", &repository.id, repository.into())
}

#[derive(Debug, Deserialize)]
pub struct CreateRepositoryAttributes {
    pub remote_uri: String,
    #[serde(default)]
    pub tracking: Option<TrackingConfig>,
}

/// `POST /api/v1/repositories`: 201 on create (ingestion enqueued), 200 when
/// the sanitized remote is already registered.
pub async fn create_repository(
    State(state): State<ApiState>,
    Json(body): Json<Document<NewResource<CreateRepositoryAttributes>>>,
) -> Result<impl IntoResponse, ApiError> {
    let attributes = body.data.attributes;
    let tracking = attributes.tracking.unwrap_or_default();

    let (repository, created) =
        Repository::find_or_create(&state.db, &attributes.remote_uri, tracking).await?;
    if created {
        info!(repository_id = %repository.id, "registered repository");
        state.pipeline.enqueue_repository(&repository.id).await?;
    }

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(Document::new(repository_resource(&repository)))))
}

pub async fn list_repositories(
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let repositories = Repository::list(&state.db).await?;
    let resources: Vec<_> = repositories.iter().map(repository_resource).collect();

    Ok(Json(Document::new(resources)))
}

pub async fn get_repository(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let repository = Repository::require(&state.db, &id).await?;

    Ok(Json(Document::new(repository_resource(&repository))))
}

/// `DELETE /api/v1/repositories/{id}`: enqueues the durable deletion task and
/// answers 204; the tree disappears as the queue drains.
pub async fn delete_repository(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.pipeline.enqueue_delete_repository(&id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct TaskStatusAttributes {
    pub operation: String,
    pub state: String,
    pub parent: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub current: u64,
    pub total: u64,
    pub updated_at: DateTime<Utc>,
}

impl From<&TaskStatus> for TaskStatusAttributes {
    fn from(status: &TaskStatus) -> Self {
        Self {
            operation: status.operation.clone(),
            state: status.state.as_str().to_string(),
            parent: status.parent.clone(),
            message: status.message.clone(),
            error: status.error.clone(),
            current: status.current,
            total: status.total,
            updated_at: status.updated_at,
        }
    }
}

pub async fn repository_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Repository::require(&state.db, &id).await?;
    let statuses = TaskStatus::list_for_trackable(&state.db, "repository", &id).await?;
    let resources: Vec<Resource<TaskStatusAttributes>> = statuses
        .iter()
        .map(|status| Resource::new("task_status", &status.id, status.into()))
        .collect();

    Ok(Json(Document::new(resources)))
}

pub async fn repository_status_summary(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Repository::require(&state.db, &id).await?;
    let summary = TaskStatus::summary_for_trackable(&state.db, "repository", &id).await?;

    Ok(Json(Document::new(summary)))
}
