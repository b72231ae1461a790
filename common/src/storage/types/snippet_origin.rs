use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(SnippetOrigin, "snippet_origin", {
    snippet_id: String,
    commit_sha: String,
    path: String,
    repository_id: String
});

impl SnippetOrigin {
    pub fn new(snippet_id: &str, commit_sha: &str, path: &str, repository_id: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            snippet_id: snippet_id.to_string(),
            commit_sha: commit_sha.to_string(),
            path: path.to_string(),
            repository_id: repository_id.to_string(),
        }
    }

    /// Association rows are deduplicated by the unique
    /// (snippet_id, commit_sha, path) index; replays are ignored.
    pub async fn insert_ignore(db: &SurrealDbClient, origins: Vec<Self>) -> Result<(), AppError> {
        if origins.is_empty() {
            return Ok(());
        }

        db.query("INSERT IGNORE INTO snippet_origin $origins")
            .bind(("origins", origins))
            .await?
            .check()?;

        Ok(())
    }

    /// Snippet ids referenced by a commit, ordered by file path for stable
    /// listings.
    pub async fn snippet_ids_for_commit(
        db: &SurrealDbClient,
        commit_sha: &str,
    ) -> Result<Vec<String>, AppError> {
        let mut response = db
            .query(
                "SELECT VALUE snippet_id FROM type::table($table) \
                 WHERE commit_sha = $commit_sha ORDER BY path ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("commit_sha", commit_sha.to_string()))
            .await?;
        let ids: Vec<String> = response.take(0)?;

        Ok(ids)
    }

    pub async fn snippet_ids_for_repositories(
        db: &SurrealDbClient,
        repository_ids: Vec<String>,
    ) -> Result<Vec<String>, AppError> {
        if repository_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = db
            .query(
                "SELECT VALUE snippet_id FROM type::table($table) \
                 WHERE repository_id INSIDE $repository_ids",
            )
            .bind(("table", Self::table_name()))
            .bind(("repository_ids", repository_ids))
            .await?;
        let ids: Vec<String> = response.take(0)?;

        Ok(ids)
    }

    pub async fn count_for_snippet(
        db: &SurrealDbClient,
        snippet_id: &str,
    ) -> Result<u64, AppError> {
        let mut response = db
            .query(
                "SELECT count() AS total FROM type::table($table) \
                 WHERE snippet_id = $snippet_id GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("snippet_id", snippet_id.to_string()))
            .await?;
        let counts: Vec<serde_json::Value> = response.take(0)?;

        Ok(counts
            .first()
            .and_then(|row| row.get("total"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0))
    }

    pub async fn delete_for_commit(
        db: &SurrealDbClient,
        commit_sha: &str,
    ) -> Result<(), AppError> {
        db.query("DELETE type::table($table) WHERE commit_sha = $commit_sha")
            .bind(("table", Self::table_name()))
            .bind(("commit_sha", commit_sha.to_string()))
            .await?
            .check()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::indexes::ensure_schema_indexes;

    #[tokio::test]
    async fn replayed_origins_do_not_duplicate() {
        let namespace = "origin_test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");
        ensure_schema_indexes(&db)
            .await
            .expect("indexes should build");

        let sha = "c".repeat(40);
        let first = SnippetOrigin::new("snippet-1", &sha, "src/a.py", "repo-1");
        let replay = SnippetOrigin::new("snippet-1", &sha, "src/a.py", "repo-1");
        let other = SnippetOrigin::new("snippet-2", &sha, "src/b.py", "repo-1");

        SnippetOrigin::insert_ignore(&db, vec![first, replay, other])
            .await
            .expect("insert should succeed");

        let ids = SnippetOrigin::snippet_ids_for_commit(&db, &sha)
            .await
            .expect("listing should succeed");
        assert_eq!(ids, vec!["snippet-1".to_string(), "snippet-2".to_string()]);

        assert_eq!(
            SnippetOrigin::count_for_snippet(&db, "snippet-1")
                .await
                .expect("count should succeed"),
            1
        );
    }

    #[tokio::test]
    async fn filters_by_repository() {
        let namespace = "origin_test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");
        ensure_schema_indexes(&db)
            .await
            .expect("indexes should build");

        SnippetOrigin::insert_ignore(
            &db,
            vec![
                SnippetOrigin::new("s-1", &"a".repeat(40), "a.py", "repo-a"),
                SnippetOrigin::new("s-2", &"b".repeat(40), "b.py", "repo-b"),
            ],
        )
        .await
        .expect("insert should succeed");

        let ids = SnippetOrigin::snippet_ids_for_repositories(&db, vec!["repo-a".into()])
            .await
            .expect("filter should succeed");
        assert_eq!(ids, vec!["s-1".to_string()]);

        let none = SnippetOrigin::snippet_ids_for_repositories(&db, Vec::new())
            .await
            .expect("empty filter should succeed");
        assert!(none.is_empty());
    }
}
