use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use common::storage::types::{
    enrichment_association::EntityKind, git_commit::GitCommit, git_file::GitFile,
    repository::Repository, snippet::{Snippet, SnippetSource},
};

use crate::{
    api_state::ApiState,
    error::ApiError,
    jsonapi::{Document, Resource},
    routes::enrichments::{enrichment_resource, EnrichmentAttributes},
};

#[derive(Debug, Serialize)]
pub struct CommitAttributes {
    pub repository_id: String,
    pub parent_sha: Option<String>,
    pub author: String,
    pub authored_at: DateTime<Utc>,
    pub message: String,
}

impl From<&GitCommit> for CommitAttributes {
    fn from(commit: &GitCommit) -> Self {
        Self {
            repository_id: commit.repository_id.clone(),
            parent_sha: commit.parent_sha.clone(),
            author: commit.author.clone(),
            authored_at: commit.authored_at,
            message: commit.message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FileAttributes {
    pub commit_sha: String,
    pub path: String,
    pub blob_sha: String,
    pub mime_type: String,
    pub extension: String,
    pub size: u64,
}

impl From<&GitFile> for FileAttributes {
    fn from(file: &GitFile) -> Self {
        Self {
            commit_sha: file.commit_sha.clone(),
            path: file.path.clone(),
            blob_sha: file.blob_sha.clone(),
            mime_type: file.mime_type.clone(),
            extension: file.extension.clone(),
            size: file.size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SnippetAttributes {
    pub content: String,
    pub extension: String,
    pub derives_from: Vec<SnippetSource>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Snippet> for SnippetAttributes {
    fn from(snippet: &Snippet) -> Self {
        Self {
            content: snippet.content.clone(),
            extension: snippet.extension.clone(),
            derives_from: snippet.derives_from.clone(),
            created_at: snippet.created_at,
            updated_at: snippet.updated_at,
        }
    }
}

async fn require_repository_commit(
    state: &ApiState,
    repository_id: &str,
    sha: &str,
) -> Result<GitCommit, ApiError> {
    Repository::require(&state.db, repository_id).await?;
    let commit = GitCommit::require(&state.db, sha).await?;
    if commit.repository_id != repository_id {
        return Err(ApiError::NotFound(format!(
            "commit {sha} does not belong to repository {repository_id}"
        )));
    }
    Ok(commit)
}

pub async fn list_commits(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Repository::require(&state.db, &id).await?;
    let commits = GitCommit::list_for_repository(&state.db, &id).await?;
    let resources: Vec<Resource<CommitAttributes>> = commits
        .iter()
        .map(|commit| Resource::new("commit", &commit.id, commit.into()))
        .collect();

    Ok(Json(Document::new(resources)))
}

pub async fn get_commit(
    State(state): State<ApiState>,
    Path((id, sha)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let commit = require_repository_commit(&state, &id, &sha).await?;

    Ok(Json(Document::new(Resource::new(
        "commit",
        &commit.id,
        CommitAttributes::from(&commit),
    ))))
}

pub async fn list_commit_files(
    State(state): State<ApiState>,
    Path((id, sha)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    require_repository_commit(&state, &id, &sha).await?;
    let files = GitFile::list_for_commit(&state.db, &sha).await?;
    let resources: Vec<Resource<FileAttributes>> = files
        .iter()
        .map(|file| Resource::new("file", &file.id, file.into()))
        .collect();

    Ok(Json(Document::new(resources)))
}

pub async fn get_commit_file(
    State(state): State<ApiState>,
    Path((id, sha, blob)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    require_repository_commit(&state, &id, &sha).await?;
    let file = GitFile::get_by_blob(&state.db, &sha, &blob)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("blob {blob} in commit {sha}")))?;

    Ok(Json(Document::new(Resource::new(
        "file",
        &file.id,
        FileAttributes::from(&file),
    ))))
}

pub async fn list_commit_snippets(
    State(state): State<ApiState>,
    Path((id, sha)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    require_repository_commit(&state, &id, &sha).await?;
    let snippets = Snippet::list_by_commit(&state.db, &sha).await?;
    let resources: Vec<Resource<SnippetAttributes>> = snippets
        .iter()
        .map(|snippet| Resource::new("snippet", &snippet.id, snippet.into()))
        .collect();

    Ok(Json(Document::new(resources)))
}

pub async fn list_commit_enrichments(
    State(state): State<ApiState>,
    Path((id, sha)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    require_repository_commit(&state, &id, &sha).await?;
    let enrichments = common::storage::types::enrichment::Enrichment::list_for_entity(
        &state.db,
        EntityKind::GitCommits,
        &sha,
        None,
        None,
    )
    .await?;
    let resources: Vec<Resource<EnrichmentAttributes>> =
        enrichments.iter().map(enrichment_resource).collect();

    Ok(Json(Document::new(resources)))
}

pub async fn get_commit_enrichment(
    State(state): State<ApiState>,
    Path((id, sha, enrichment_id)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    require_repository_commit(&state, &id, &sha).await?;
    let enrichment =
        common::storage::types::enrichment::Enrichment::require(&state.db, &enrichment_id).await?;

    Ok(Json(Document::new(enrichment_resource(&enrichment))))
}

/// `POST .../commits/{sha}/rescan`: re-enqueue the commit's stage DAG, 202.
pub async fn rescan_commit(
    State(state): State<ApiState>,
    Path((id, sha)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    require_repository_commit(&state, &id, &sha).await?;
    state.pipeline.rescan_commit(&id, &sha).await?;

    Ok(StatusCode::ACCEPTED)
}
