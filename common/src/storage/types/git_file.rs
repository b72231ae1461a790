use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(GitFile, "git_file", {
    commit_sha: String,
    path: String,
    blob_sha: String,
    mime_type: String,
    extension: String,
    size: u64
});

impl GitFile {
    /// One immutable row per (commit, path); the record id encodes the pair.
    pub fn record_id(commit_sha: &str, path: &str) -> String {
        format!("{commit_sha}:{path}")
    }

    pub fn new(
        commit_sha: &str,
        path: &str,
        blob_sha: &str,
        mime_type: &str,
        size: u64,
    ) -> Self {
        let now = chrono::Utc::now();
        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        Self {
            id: Self::record_id(commit_sha, path),
            created_at: now,
            updated_at: now,
            commit_sha: commit_sha.to_string(),
            path: path.to_string(),
            blob_sha: blob_sha.to_string(),
            mime_type: mime_type.to_string(),
            extension,
            size,
        }
    }

    pub async fn store_ignore(db: &SurrealDbClient, files: Vec<Self>) -> Result<(), AppError> {
        if files.is_empty() {
            return Ok(());
        }

        db.query("INSERT IGNORE INTO git_file $files")
            .bind(("files", files))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn list_for_commit(
        db: &SurrealDbClient,
        commit_sha: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) WHERE commit_sha = $commit_sha \
                 ORDER BY path ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("commit_sha", commit_sha.to_string()))
            .await?;
        let files: Vec<Self> = response.take(0)?;

        Ok(files)
    }

    pub async fn get_by_blob(
        db: &SurrealDbClient,
        commit_sha: &str,
        blob_sha: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM type::table($table) WHERE commit_sha = $commit_sha \
                 AND blob_sha = $blob_sha LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("commit_sha", commit_sha.to_string()))
            .bind(("blob_sha", blob_sha.to_string()))
            .await?;
        let files: Vec<Self> = response.take(0)?;

        Ok(files.into_iter().next())
    }

    pub async fn delete_for_commits(
        db: &SurrealDbClient,
        commit_shas: Vec<String>,
    ) -> Result<(), AppError> {
        if commit_shas.is_empty() {
            return Ok(());
        }

        db.query("DELETE type::table($table) WHERE commit_sha INSIDE $commit_shas")
            .bind(("table", Self::table_name()))
            .bind(("commit_shas", commit_shas))
            .await?
            .check()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn derives_extension_from_path() {
        let file = GitFile::new(&"a".repeat(40), "src/lib.RS", "b".repeat(40).as_str(), "text/x-rust", 120);
        assert_eq!(file.extension, "rs");

        let no_ext = GitFile::new(&"a".repeat(40), "Makefile", "c".repeat(40).as_str(), "text/plain", 64);
        assert_eq!(no_ext.extension, "");
    }

    #[tokio::test]
    async fn files_are_unique_per_commit_and_path() {
        let namespace = "file_test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let sha = "f".repeat(40);
        let file = GitFile::new(&sha, "src/main.py", &"1".repeat(40), "text/x-python", 42);
        GitFile::store_ignore(&db, vec![file.clone()])
            .await
            .expect("first insert should succeed");

        let mut replayed = file.clone();
        replayed.size = 9000;
        GitFile::store_ignore(&db, vec![replayed])
            .await
            .expect("replay should be ignored");

        let files = GitFile::list_for_commit(&db, &sha)
            .await
            .expect("list should succeed");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 42);

        let by_blob = GitFile::get_by_blob(&db, &sha, &"1".repeat(40))
            .await
            .expect("blob lookup should succeed");
        assert!(by_blob.is_some());
    }
}
