use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(GitBranch, "git_branch", {
    repository_id: String,
    name: String,
    head_sha: String
});

impl GitBranch {
    /// Branches advance: the (repository, name) pair keeps one row whose head
    /// is replaced on every sync. The record id encodes that pair.
    pub fn record_id(repository_id: &str, name: &str) -> String {
        format!("{repository_id}:{name}")
    }

    pub async fn upsert_ref(
        db: &SurrealDbClient,
        repository_id: &str,
        name: &str,
        head_sha: &str,
    ) -> Result<Self, AppError> {
        let now = chrono::Utc::now();
        let branch = Self {
            id: Self::record_id(repository_id, name),
            created_at: now,
            updated_at: now,
            repository_id: repository_id.to_string(),
            name: name.to_string(),
            head_sha: head_sha.to_string(),
        };

        db.upsert_item(branch.clone()).await?;

        Ok(branch)
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
        let branches: Vec<Self> = response.take(0)?;

        Ok(branches)
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

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn upsert_advances_branch_head_in_place() {
        let namespace = "branch_test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        GitBranch::upsert_ref(&db, "repo-1", "main", &"a".repeat(40))
            .await
            .expect("first upsert should succeed");
        GitBranch::upsert_ref(&db, "repo-1", "main", &"b".repeat(40))
            .await
            .expect("second upsert should succeed");
        GitBranch::upsert_ref(&db, "repo-1", "feature/parser", &"c".repeat(40))
            .await
            .expect("third upsert should succeed");

        let branches = GitBranch::list_for_repository(&db, "repo-1")
            .await
            .expect("list should succeed");
        assert_eq!(branches.len(), 2);

        let main = branches
            .iter()
            .find(|b| b.name == "main")
            .expect("main should exist");
        assert_eq!(main.head_sha, "b".repeat(40));
    }
}
