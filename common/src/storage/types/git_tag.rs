use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(GitTag, "git_tag", {
    repository_id: String,
    name: String,
    target_sha: String
});

impl GitTag {
    /// Tags can be reassigned, so (repository, name) keeps a single row.
    pub fn record_id(repository_id: &str, name: &str) -> String {
        format!("{repository_id}:{name}")
    }

    pub async fn upsert_ref(
        db: &SurrealDbClient,
        repository_id: &str,
        name: &str,
        target_sha: &str,
    ) -> Result<Self, AppError> {
        let now = chrono::Utc::now();
        let tag = Self {
            id: Self::record_id(repository_id, name),
            created_at: now,
            updated_at: now,
            repository_id: repository_id.to_string(),
            name: name.to_string(),
            target_sha: target_sha.to_string(),
        };

        db.upsert_item(tag.clone()).await?;

        Ok(tag)
    }

    pub async fn list_for_repository(
        db: &SurrealDbClient,
        repository_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) WHERE repository_id = $repository_id \
                 ORDER BY name ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("repository_id", repository_id.to_string()))
            .await?;
        let tags: Vec<Self> = response.take(0)?;

        Ok(tags)
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
