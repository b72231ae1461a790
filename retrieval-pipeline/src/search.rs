use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            enrichment::Enrichment, enrichment_association::EntityKind, snippet::Snippet,
            snippet_origin::SnippetOrigin,
        },
    },
    utils::embedding::EmbeddingProvider,
};

use crate::{
    fts,
    scoring::{reciprocal_rank_fusion, RankedList, Signal, SubScores},
    vector::{self, EmbeddingTable},
};

/// Each sub-query fetches this many times the requested limit before fusion.
const FETCH_MULTIPLIER: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Repository ids; hits are restricted to snippets those repos derive.
    pub sources: Option<Vec<String>>,
    /// File extensions, e.g. `py`, `rs`.
    pub languages: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub keywords: Option<Vec<String>>,
    pub code: Option<String>,
    pub text: Option<String>,
    pub limit: usize,
    pub filters: SearchFilters,
}

/// A fused hit materialized for display.
#[derive(Debug, Clone)]
pub struct SnippetResult {
    pub snippet: Snippet,
    pub score: f32,
    pub scores: SubScores,
    pub found_via: Vec<&'static str>,
    pub enrichments: Vec<Enrichment>,
}

/// The snippet id set a request's filters resolve to.
enum ResolvedFilter {
    Unbounded,
    Ids(Vec<String>),
    /// A filter was given and excludes everything.
    Empty,
}

/// The hybrid search engine: one BM25 sub-query and up to two vector
/// sub-queries run concurrently, their ranked lists fuse by reciprocal rank,
/// and the surviving ids are materialized from the snippet store.
pub struct SearchEngine {
    db: Arc<SurrealDbClient>,
    code_embedder: Arc<EmbeddingProvider>,
    text_embedder: Arc<EmbeddingProvider>,
}

impl SearchEngine {
    pub fn new(
        db: Arc<SurrealDbClient>,
        code_embedder: Arc<EmbeddingProvider>,
        text_embedder: Arc<EmbeddingProvider>,
    ) -> Self {
        Self {
            db,
            code_embedder,
            text_embedder,
        }
    }

    pub async fn find(&self, request: SearchRequest) -> Result<Vec<SnippetResult>, AppError> {
        if request.limit == 0 {
            return Err(AppError::Validation("limit must be positive".into()));
        }

        let keyword_query = request
            .keywords
            .as_ref()
            .map(|keywords| {
                keywords
                    .iter()
                    .map(String::as_str)
                    .filter(|k| !k.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|joined| !joined.is_empty());
        let code_query = request
            .code
            .as_ref()
            .filter(|code| !code.trim().is_empty());
        let text_query = request
            .text
            .as_ref()
            .filter(|text| !text.trim().is_empty());

        if keyword_query.is_none() && code_query.is_none() && text_query.is_none() {
            return Err(AppError::Validation(
                "search request must include keywords, code, or text".into(),
            ));
        }

        let filter = match self.resolve_filter(&request.filters).await? {
            ResolvedFilter::Unbounded => None,
            ResolvedFilter::Ids(ids) => Some(ids),
            // A filter was requested and matched nothing at all.
            ResolvedFilter::Empty => return Ok(Vec::new()),
        };
        let fetch_limit = request.limit.saturating_mul(FETCH_MULTIPLIER);

        let keyword_hits = async {
            match &keyword_query {
                Some(query) => fts::search(&self.db, query, fetch_limit, filter.as_deref()).await,
                None => Ok(Vec::new()),
            }
        };
        let code_hits = async {
            match code_query {
                Some(code) => {
                    let embedded = self.code_embedder.embed(code).await?;
                    vector::search(
                        &self.db,
                        EmbeddingTable::Code,
                        embedded,
                        fetch_limit,
                        filter.as_deref(),
                    )
                    .await
                }
                None => Ok(Vec::new()),
            }
        };
        let text_hits = async {
            match text_query {
                Some(text) => {
                    let embedded = self.text_embedder.embed(text).await?;
                    vector::search(
                        &self.db,
                        EmbeddingTable::Text,
                        embedded,
                        fetch_limit,
                        filter.as_deref(),
                    )
                    .await
                }
                None => Ok(Vec::new()),
            }
        };

        // Fusion needs every list, so the fan-out joins before ranking.
        let (keyword_hits, code_hits, text_hits) =
            tokio::try_join!(keyword_hits, code_hits, text_hits)?;

        debug!(
            keyword_hits = keyword_hits.len(),
            code_hits = code_hits.len(),
            text_hits = text_hits.len(),
            "search fan-out returned"
        );

        let mut lists = Vec::new();
        if keyword_query.is_some() {
            lists.push(RankedList {
                signal: Signal::Keyword,
                hits: keyword_hits
                    .into_iter()
                    .map(|hit| (hit.snippet_id, hit.score))
                    .collect(),
            });
        }
        if code_query.is_some() {
            lists.push(RankedList {
                signal: Signal::Code,
                hits: code_hits
                    .into_iter()
                    .map(|hit| (hit.snippet_id, hit.distance))
                    .collect(),
            });
        }
        if text_query.is_some() {
            lists.push(RankedList {
                signal: Signal::Text,
                hits: text_hits
                    .into_iter()
                    .map(|hit| (hit.snippet_id, hit.distance))
                    .collect(),
            });
        }

        let mut fused = reciprocal_rank_fusion(lists);
        fused.truncate(request.limit);

        self.materialize(fused).await
    }

    /// Resolve the request filters into a snippet id set.
    async fn resolve_filter(&self, filters: &SearchFilters) -> Result<ResolvedFilter, AppError> {
        let mut filter: Option<Vec<String>> = None;

        if let Some(sources) = &filters.sources {
            let ids =
                SnippetOrigin::snippet_ids_for_repositories(&self.db, sources.clone()).await?;
            let unique: BTreeSet<String> = ids.into_iter().collect();
            if unique.is_empty() {
                return Ok(ResolvedFilter::Empty);
            }
            filter = Some(unique.into_iter().collect());
        }

        if let Some(languages) = &filters.languages {
            let extensions: Vec<String> = languages
                .iter()
                .map(|l| l.trim_start_matches('.').to_ascii_lowercase())
                .collect();
            let ids = Snippet::ids_for_extensions(&self.db, filter, extensions).await?;
            if ids.is_empty() {
                return Ok(ResolvedFilter::Empty);
            }
            filter = Some(ids);
        }

        Ok(match filter {
            Some(ids) => ResolvedFilter::Ids(ids),
            None => ResolvedFilter::Unbounded,
        })
    }

    async fn materialize(&self, fused: Vec<crate::scoring::FusedHit>) -> Result<Vec<SnippetResult>, AppError> {
        let ids: Vec<String> = fused.iter().map(|hit| hit.snippet_id.clone()).collect();
        let mut snippets = Snippet::fetch_by_ids(&self.db, &ids).await?;

        let mut results = Vec::with_capacity(fused.len());
        for hit in fused {
            // An index row can outlive its snippet briefly during deletes;
            // such hits are dropped rather than surfaced half-empty.
            let Some(snippet) = snippets.remove(&hit.snippet_id) else {
                continue;
            };
            let enrichments =
                Enrichment::list_for_entity(&self.db, EntityKind::Snippet, &snippet.id, None, None)
                    .await?;
            results.push(SnippetResult {
                snippet,
                score: hit.score,
                scores: hit.scores,
                found_via: hit.found_via,
                enrichments,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::indexes::{ensure_runtime_indexes, ensure_schema_indexes};
    use common::storage::types::enrichment::{EnrichmentSubtype, EnrichmentType};
    use common::storage::types::snippet::{content_sha, SnippetCandidate, SnippetSource};
    use uuid::Uuid;

    const DIM: usize = 16;

    struct Fixture {
        db: Arc<SurrealDbClient>,
        engine: SearchEngine,
        embedder: Arc<EmbeddingProvider>,
    }

    async fn fixture() -> Fixture {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("search_test_ns", &database)
                .await
                .expect("failed to create in-memory surreal"),
        );
        ensure_schema_indexes(&db)
            .await
            .expect("schema indexes should build");
        ensure_runtime_indexes(&db, DIM)
            .await
            .expect("runtime indexes should build");

        let embedder = Arc::new(EmbeddingProvider::hashed(DIM));
        let engine = SearchEngine::new(Arc::clone(&db), Arc::clone(&embedder), Arc::clone(&embedder));

        Fixture {
            db,
            engine,
            embedder,
        }
    }

    async fn index_snippet(fixture: &Fixture, content: &str, repo: &str, commit: &str, path: &str) {
        let candidate = SnippetCandidate {
            content: content.to_string(),
            extension: path.rsplit('.').next().unwrap_or_default().to_string(),
            source: SnippetSource {
                commit_sha: commit.to_string(),
                path: path.to_string(),
                blob_sha: "b".repeat(40),
                repository_id: repo.to_string(),
            },
        };
        let ids = Snippet::upsert_batch(&fixture.db, vec![candidate])
            .await
            .expect("snippet upsert should succeed");

        fts::index_documents(&fixture.db, vec![(ids[0].clone(), content.to_string())])
            .await
            .expect("bm25 indexing should succeed");

        let embedded = fixture
            .embedder
            .embed(content)
            .await
            .expect("embedding should succeed");
        vector::save_all(
            &fixture.db,
            EmbeddingTable::Code,
            vec![(ids[0].clone(), embedded)],
            DIM,
        )
        .await
        .expect("vector save should succeed");
    }

    #[tokio::test]
    async fn rejects_empty_requests_and_bad_limits() {
        let fixture = fixture().await;

        let err = fixture
            .engine
            .find(SearchRequest {
                limit: 5,
                ..SearchRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = fixture
            .engine
            .find(SearchRequest {
                keywords: Some(vec!["add".into()]),
                limit: 0,
                ..SearchRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn keyword_search_finds_indexed_snippets() {
        let fixture = fixture().await;
        index_snippet(
            &fixture,
            "def add(a, b): return a + b",
            "repo-1",
            &"a".repeat(40),
            "src/math.py",
        )
        .await;

        let results = fixture
            .engine
            .find(SearchRequest {
                keywords: Some(vec!["add".into(), "numbers".into()]),
                limit: 3,
                ..SearchRequest::default()
            })
            .await
            .expect("search should succeed");

        assert_eq!(results.len(), 1);
        assert!(results[0].score > 0.0);
        assert_eq!(results[0].found_via, vec!["keyword"]);
        assert_eq!(results[0].snippet.extension, "py");

        let none = fixture
            .engine
            .find(SearchRequest {
                keywords: Some(vec!["xyzzy".into()]),
                limit: 3,
                ..SearchRequest::default()
            })
            .await
            .expect("search should succeed");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn code_search_ranks_the_matching_snippet_first() {
        let fixture = fixture().await;
        index_snippet(
            &fixture,
            "def add(a, b): return a + b",
            "repo-1",
            &"a".repeat(40),
            "src/add.py",
        )
        .await;
        index_snippet(
            &fixture,
            "class HttpServer: pass",
            "repo-1",
            &"a".repeat(40),
            "src/server.py",
        )
        .await;

        let results = fixture
            .engine
            .find(SearchRequest {
                code: Some("def add(a, b): return a + b".into()),
                limit: 2,
                ..SearchRequest::default()
            })
            .await
            .expect("search should succeed");

        assert!(!results.is_empty());
        assert_eq!(
            results[0].snippet.id,
            content_sha("def add(a, b): return a + b")
        );
        assert!(results[0].scores.code_distance.is_some());
    }

    #[tokio::test]
    async fn agreement_between_signals_outranks_single_hits() {
        let fixture = fixture().await;
        index_snippet(
            &fixture,
            "def add(a, b): return a + b",
            "repo-1",
            &"a".repeat(40),
            "src/add.py",
        )
        .await;
        index_snippet(
            &fixture,
            "def multiply(a, b): return a * b",
            "repo-1",
            &"a".repeat(40),
            "src/mul.py",
        )
        .await;

        let results = fixture
            .engine
            .find(SearchRequest {
                keywords: Some(vec!["add".into()]),
                code: Some("def add(a, b): return a + b".into()),
                limit: 2,
                ..SearchRequest::default()
            })
            .await
            .expect("search should succeed");

        assert!(!results.is_empty());
        assert_eq!(
            results[0].snippet.id,
            content_sha("def add(a, b): return a + b")
        );
        assert!(results[0].found_via.contains(&"keyword"));
        assert!(results[0].found_via.contains(&"code"));
    }

    #[tokio::test]
    async fn source_filter_restricts_to_requested_repositories() {
        let fixture = fixture().await;
        index_snippet(
            &fixture,
            "def in_repo_a(): pass",
            "repo-a",
            &"a".repeat(40),
            "src/a.py",
        )
        .await;
        index_snippet(
            &fixture,
            "def in_repo_b(): pass",
            "repo-b",
            &"b".repeat(40),
            "src/b.py",
        )
        .await;

        let results = fixture
            .engine
            .find(SearchRequest {
                keywords: Some(vec!["def".into(), "repo".into(), "pass".into()]),
                code: None,
                text: None,
                limit: 10,
                filters: SearchFilters {
                    sources: Some(vec!["repo-b".into()]),
                    languages: None,
                },
            })
            .await
            .expect("search should succeed");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].snippet.id, content_sha("def in_repo_b(): pass"));

        // A source filter that matches nothing answers without sub-queries.
        let nothing = fixture
            .engine
            .find(SearchRequest {
                keywords: Some(vec!["pass".into()]),
                code: None,
                text: None,
                limit: 10,
                filters: SearchFilters {
                    sources: Some(vec!["repo-missing".into()]),
                    languages: None,
                },
            })
            .await
            .expect("search should succeed");
        assert!(nothing.is_empty());
    }

    #[tokio::test]
    async fn results_carry_display_enrichments() {
        let fixture = fixture().await;
        index_snippet(
            &fixture,
            "def add(a, b): return a + b",
            "repo-1",
            &"a".repeat(40),
            "src/add.py",
        )
        .await;
        let snippet_id = content_sha("def add(a, b): return a + b");

        Enrichment::create_with_associations(
            &fixture.db,
            Enrichment::new(
                EnrichmentType::Usage,
                EnrichmentSubtype::SnippetSummary,
                "Adds two numbers.".into(),
            ),
            vec![(EntityKind::Snippet, snippet_id.clone())],
        )
        .await
        .expect("enrichment should persist");

        let results = fixture
            .engine
            .find(SearchRequest {
                keywords: Some(vec!["add".into()]),
                limit: 1,
                ..SearchRequest::default()
            })
            .await
            .expect("search should succeed");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].enrichments.len(), 1);
        assert_eq!(results[0].enrichments[0].content, "Adds two numbers.");
    }
}
