use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(GitCommit, "git_commits", {
    repository_id: String,
    parent_sha: Option<String>,
    author: String,
    #[serde(
        serialize_with = "serialize_surreal_datetime",
        deserialize_with = "deserialize_surreal_datetime",
        default
    )]
    authored_at: chrono::DateTime<chrono::Utc>,
    message: String
});

/// A commit sha is the 40-char lowercase hex git object id.
pub fn is_commit_sha(candidate: &str) -> bool {
    candidate.len() == 40 && candidate.chars().all(|c| c.is_ascii_hexdigit())
}

impl GitCommit {
    pub fn new(
        sha: &str,
        repository_id: &str,
        parent_sha: Option<String>,
        author: String,
        authored_at: chrono::DateTime<chrono::Utc>,
        message: String,
    ) -> Result<Self, AppError> {
        if !is_commit_sha(sha) {
            return Err(AppError::Validation(format!(
                "'{sha}' is not a 40-char hex commit sha"
            )));
        }

        let now = chrono::Utc::now();
        Ok(Self {
            id: sha.to_ascii_lowercase(),
            created_at: now,
            updated_at: now,
            repository_id: repository_id.to_string(),
            parent_sha,
            author,
            authored_at,
            message,
        })
    }

    /// Commits are immutable: rows with a known sha are left untouched.
    pub async fn store_ignore(db: &SurrealDbClient, commits: Vec<Self>) -> Result<(), AppError> {
        if commits.is_empty() {
            return Ok(());
        }

        db.query("INSERT IGNORE INTO git_commits $commits")
            .bind(("commits", commits))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn get(db: &SurrealDbClient, sha: &str) -> Result<Option<Self>, AppError> {
        Ok(db.get_item::<Self>(&sha.to_ascii_lowercase()).await?)
    }

    pub async fn require(db: &SurrealDbClient, sha: &str) -> Result<Self, AppError> {
        Self::get(db, sha)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("commit {sha}")))
    }

    pub async fn list_for_repository(
        db: &SurrealDbClient,
        repository_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) WHERE repository_id = $repository_id \
                 ORDER BY authored_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("repository_id", repository_id.to_string()))
            .await?;
        let commits: Vec<Self> = response.take(0)?;

        Ok(commits)
    }

    pub async fn delete_for_repository(
        db: &SurrealDbClient,
        repository_id: &str,
    ) -> Result<(), AppError> {
        db.query("DELETE type::table($table) WHERE repository_id = $repository_id")
            .bind(("table", Self::table_name()))
            .bind(("repository_id", repository_id.to_string()))
            .await?
            .check()?;

        Ok(())
    }
}
