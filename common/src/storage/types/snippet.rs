use std::collections::HashMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use surrealdb::sql::Thing;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::snippet_origin::SnippetOrigin;

/// One file a snippet was extracted from. A snippet with identical content in
/// several commits carries one entry per distinct (commit, path).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnippetSource {
    pub commit_sha: String,
    pub path: String,
    pub blob_sha: String,
    pub repository_id: String,
}

/// Extraction output waiting to be persisted.
#[derive(Debug, Clone)]
pub struct SnippetCandidate {
    pub content: String,
    pub extension: String,
    pub source: SnippetSource,
}

stored_object!(Snippet, "snippet", {
    content: String,
    extension: String,
    derives_from: Vec<SnippetSource>
});

/// SHA-256 hex of the UTF-8 content; this is the snippet's identity.
pub fn content_sha(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{digest:x}")
}

/// A snippet id is the 64-char hex SHA-256 of its content.
pub fn is_snippet_sha(candidate: &str) -> bool {
    candidate.len() == 64 && candidate.chars().all(|c| c.is_ascii_hexdigit())
}

impl Snippet {
    /// Content-addressed upsert for one commit's extraction batch.
    ///
    /// Identical content maps onto one row whose `derives_from` grows by
    /// first-seen union; `updated_at` advances on every upsert while
    /// `created_at` stays at the first insert. Snippet rows and their origin
    /// association rows are written inside a single transaction, so a failed
    /// statement rolls back the whole batch. Returns the ids in input order.
    pub async fn upsert_batch(
        db: &SurrealDbClient,
        candidates: Vec<SnippetCandidate>,
    ) -> Result<Vec<String>, AppError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now();
        let mut ordered_ids = Vec::with_capacity(candidates.len());
        let mut rows: HashMap<String, Snippet> = HashMap::new();
        let mut origins = Vec::new();

        let candidate_ids: Vec<String> = candidates
            .iter()
            .map(|candidate| content_sha(&candidate.content))
            .collect();
        let existing = Self::fetch_by_ids(db, &candidate_ids).await?;

        for (id, candidate) in candidate_ids.into_iter().zip(candidates) {
            ordered_ids.push(id.clone());
            origins.push(SnippetOrigin::new(
                &id,
                &candidate.source.commit_sha,
                &candidate.source.path,
                &candidate.source.repository_id,
            ));

            let row = rows.entry(id.clone()).or_insert_with(|| {
                existing.get(&id).cloned().unwrap_or(Snippet {
                    id,
                    created_at: now,
                    updated_at: now,
                    content: candidate.content.clone(),
                    extension: candidate.extension.clone(),
                    derives_from: Vec::new(),
                })
            });
            row.updated_at = now;
            if !row.derives_from.contains(&candidate.source) {
                row.derives_from.push(candidate.source);
            }
        }

        let mut statements = String::from("BEGIN TRANSACTION;");
        let bound: Vec<(String, Snippet)> = rows.into_iter().collect();
        for index in 0..bound.len() {
            let _ = write!(
                statements,
                " UPSERT type::thing('snippet', $id{index}) CONTENT $row{index};"
            );
        }
        statements.push_str(" INSERT IGNORE INTO snippet_origin $origins;");
        statements.push_str(" COMMIT TRANSACTION;");

        let mut query = db.client.query(statements);
        for (index, (id, row)) in bound.into_iter().enumerate() {
            query = query
                .bind((format!("id{index}"), id))
                .bind((format!("row{index}"), row));
        }
        query = query.bind(("origins", origins));
        query.await?.check()?;

        Ok(ordered_ids)
    }

    pub async fn get(db: &SurrealDbClient, sha: &str) -> Result<Option<Self>, AppError> {
        Ok(db.get_item::<Self>(sha).await?)
    }

    pub async fn require(db: &SurrealDbClient, sha: &str) -> Result<Self, AppError> {
        Self::get(db, sha)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("snippet {sha}")))
    }

    /// Fetch snippets by id, returned keyed by id.
    pub async fn fetch_by_ids(
        db: &SurrealDbClient,
        ids: &[String],
    ) -> Result<HashMap<String, Self>, AppError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let things: Vec<Thing> = ids
            .iter()
            .map(|id| Thing::from((Self::table_name(), id.as_str())))
            .collect();

        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE id IN $things")
            .bind(("table", Self::table_name()))
            .bind(("things", things))
            .await?;
        let snippets: Vec<Self> = response.take(0)?;

        Ok(snippets
            .into_iter()
            .map(|snippet| (snippet.id.clone(), snippet))
            .collect())
    }

    /// Snippets extracted from a commit, ordered by originating file path.
    pub async fn list_by_commit(
        db: &SurrealDbClient,
        commit_sha: &str,
    ) -> Result<Vec<Self>, AppError> {
        let ids = SnippetOrigin::snippet_ids_for_commit(db, commit_sha).await?;
        let mut by_id = Self::fetch_by_ids(db, &ids).await?;

        let mut snippets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(snippet) = by_id.remove(&id) {
                snippets.push(snippet);
            }
        }

        Ok(snippets)
    }

    /// Snippet ids restricted to a set of file extensions.
    pub async fn ids_for_extensions(
        db: &SurrealDbClient,
        ids: Option<Vec<String>>,
        extensions: Vec<String>,
    ) -> Result<Vec<String>, AppError> {
        #[derive(Deserialize)]
        struct IdRow {
            #[serde(deserialize_with = "deserialize_record_id")]
            id: String,
        }

        let mut response = match ids {
            Some(ids) => {
                let things: Vec<Thing> = ids
                    .iter()
                    .map(|id| Thing::from((Self::table_name(), id.as_str())))
                    .collect();
                db.query(
                    "SELECT id FROM type::table($table) WHERE extension INSIDE $extensions \
                     AND id IN $things",
                )
                .bind(("table", Self::table_name()))
                .bind(("extensions", extensions))
                .bind(("things", things))
                .await?
            }
            None => {
                db.query("SELECT id FROM type::table($table) WHERE extension INSIDE $extensions")
                    .bind(("table", Self::table_name()))
                    .bind(("extensions", extensions))
                    .await?
            }
        };
        let rows: Vec<IdRow> = response.take(0)?;

        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    /// Remove a commit's snippet associations; snippet rows that no other
    /// commit references are deleted and their ids returned so callers can
    /// clean up index rows.
    pub async fn delete_for_commit(
        db: &SurrealDbClient,
        commit_sha: &str,
    ) -> Result<Vec<String>, AppError> {
        let ids = SnippetOrigin::snippet_ids_for_commit(db, commit_sha).await?;
        SnippetOrigin::delete_for_commit(db, commit_sha).await?;

        let mut orphaned = Vec::new();
        for id in ids {
            if SnippetOrigin::count_for_snippet(db, &id).await? == 0 {
                db.delete_item::<Self>(&id).await?;
                orphaned.push(id);
            } else if let Some(mut snippet) = Self::get(db, &id).await? {
                snippet
                    .derives_from
                    .retain(|source| source.commit_sha != commit_sha);
                snippet.updated_at = chrono::Utc::now();
                db.upsert_item(snippet).await?;
            }
        }

        Ok(orphaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::indexes::ensure_schema_indexes;
    use uuid::Uuid;

    fn source(commit: &str, path: &str) -> SnippetSource {
        SnippetSource {
            commit_sha: commit.to_string(),
            path: path.to_string(),
            blob_sha: "b".repeat(40),
            repository_id: "repo-1".to_string(),
        }
    }

    fn candidate(content: &str, commit: &str, path: &str) -> SnippetCandidate {
        SnippetCandidate {
            content: content.to_string(),
            extension: "py".to_string(),
            source: source(commit, path),
        }
    }

    async fn test_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("snippet_test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");
        ensure_schema_indexes(&db)
            .await
            .expect("indexes should build");
        db
    }

    #[test]
    fn content_addressing_is_deterministic() {
        let body = "def add(a,b): return a+b\n";
        assert_eq!(content_sha(body), content_sha(body));
        assert_ne!(content_sha(body), content_sha("def sub(a,b): return a-b\n"));
        assert!(is_snippet_sha(&content_sha(body)));
        assert!(!is_snippet_sha("0"));
        assert!(!is_snippet_sha(&"g".repeat(64)));
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_unions_sources() {
        let db = test_db().await;
        let commit_a = "a".repeat(40);
        let commit_b = "1".repeat(40);

        let ids = Snippet::upsert_batch(
            &db,
            vec![candidate("def add(a,b): return a+b\n", &commit_a, "src/math.py")],
        )
        .await
        .expect("first upsert should succeed");
        assert_eq!(ids.len(), 1);

        let first = Snippet::require(&db, &ids[0])
            .await
            .expect("snippet should exist");
        let first_updated = first.updated_at;
        assert_eq!(first.derives_from.len(), 1);

        // Same content seen again from a second commit: same row, grown union,
        // advanced updated_at, stable created_at.
        let replay = Snippet::upsert_batch(
            &db,
            vec![candidate("def add(a,b): return a+b\n", &commit_b, "lib/math.py")],
        )
        .await
        .expect("second upsert should succeed");
        assert_eq!(replay, ids);

        let merged = Snippet::require(&db, &ids[0])
            .await
            .expect("snippet should exist");
        assert_eq!(merged.created_at, first.created_at);
        assert!(merged.updated_at >= first_updated);
        assert_eq!(
            merged
                .derives_from
                .iter()
                .map(|s| s.path.as_str())
                .collect::<Vec<_>>(),
            vec!["src/math.py", "lib/math.py"],
        );

        let all: Vec<Snippet> = db
            .get_all_stored_items()
            .await
            .expect("listing should succeed");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn lists_snippets_in_path_order() {
        let db = test_db().await;
        let commit = "2".repeat(40);

        Snippet::upsert_batch(
            &db,
            vec![
                candidate("z = 1\n", &commit, "src/z.py"),
                candidate("a = 2\n", &commit, "src/a.py"),
            ],
        )
        .await
        .expect("upsert should succeed");

        let listed = Snippet::list_by_commit(&db, &commit)
            .await
            .expect("list should succeed");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].content, "a = 2\n");
        assert_eq!(listed[1].content, "z = 1\n");
    }

    #[tokio::test]
    async fn delete_for_commit_keeps_shared_snippets() {
        let db = test_db().await;
        let commit_a = "3".repeat(40);
        let commit_b = "4".repeat(40);

        Snippet::upsert_batch(
            &db,
            vec![
                candidate("shared = True\n", &commit_a, "src/shared.py"),
                candidate("only_a = True\n", &commit_a, "src/only_a.py"),
            ],
        )
        .await
        .expect("upsert a should succeed");
        Snippet::upsert_batch(
            &db,
            vec![candidate("shared = True\n", &commit_b, "src/shared.py")],
        )
        .await
        .expect("upsert b should succeed");

        let orphaned = Snippet::delete_for_commit(&db, &commit_a)
            .await
            .expect("delete should succeed");
        assert_eq!(orphaned, vec![content_sha("only_a = True\n")]);

        let survivor = Snippet::require(&db, &content_sha("shared = True\n"))
            .await
            .expect("shared snippet should survive");
        assert_eq!(survivor.derives_from.len(), 1);
        assert_eq!(survivor.derives_from[0].commit_sha, commit_b);
    }

    #[tokio::test]
    async fn filters_ids_by_extension() {
        let db = test_db().await;
        let commit = "5".repeat(40);

        let mut rust_candidate = candidate("fn main() {}\n", &commit, "src/main.rs");
        rust_candidate.extension = "rs".into();
        Snippet::upsert_batch(
            &db,
            vec![candidate("x = 1\n", &commit, "src/x.py"), rust_candidate],
        )
        .await
        .expect("upsert should succeed");

        let ids = Snippet::ids_for_extensions(&db, None, vec!["rs".into()])
            .await
            .expect("filter should succeed");
        assert_eq!(ids, vec![content_sha("fn main() {}\n")]);
    }
}
