use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            git_commit::GitCommit,
            queue_task::QueueTask,
            repository::Repository,
            task_status::{TaskState, TaskStatus},
        },
    },
    utils::embedding::EmbeddingProvider,
};

use crate::{
    enricher::{Enricher, TextGenerator},
    scanner::RepoScanner,
    stages::{delete, enrichments, examples, git, indexing, StageKind, StageOutcome, StagePayload},
};

/// The collaborators every stage reaches through; tests substitute fixture
/// scanners and scripted generators here.
pub struct PipelineServices {
    pub scanner: Arc<dyn RepoScanner>,
    pub generator: Arc<dyn TextGenerator>,
    pub code_embedder: Arc<EmbeddingProvider>,
    pub text_embedder: Arc<EmbeddingProvider>,
}

#[derive(Clone, Debug)]
pub struct IngestionConfig {
    /// Directory clones live under, one subdirectory per repository id.
    pub clone_root: PathBuf,
    pub enrichment_parallelism: usize,
    /// Failure budget handed to the enricher for batched stages.
    pub max_failure_rate: f32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            clone_root: PathBuf::from("./data/clones"),
            enrichment_parallelism: 4,
            max_failure_rate: 0.25,
        }
    }
}

/// Drives the per-commit stage DAG: claims stage tasks off the queue, runs
/// them, records their status transitions, and enqueues dependents on
/// success. Stage failures stop their dependents but never their siblings.
pub struct IngestionPipeline {
    pub(crate) db: Arc<SurrealDbClient>,
    pub(crate) services: PipelineServices,
    pub(crate) config: IngestionConfig,
    pub(crate) enricher: Enricher,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        services: PipelineServices,
        config: IngestionConfig,
    ) -> Self {
        let enricher = Enricher::new(Arc::clone(&services.generator));
        Self {
            db,
            services,
            config,
            enricher,
        }
    }

    /// Kick off ingestion for a repository: the clone task is the DAG root,
    /// everything downstream flows from its completion.
    pub async fn enqueue_repository(&self, repository_id: &str) -> Result<(), AppError> {
        Repository::require(&self.db, repository_id).await?;
        self.ensure_root_status().await?;
        self.enqueue_stage(StageKind::Clone, &StagePayload::repository(repository_id))
            .await?;

        info!(repository_id, "repository ingestion enqueued");
        Ok(())
    }

    /// Re-enqueue every stage for one commit. Stages find their existing
    /// content-addressed rows and recompute only what is stale.
    pub async fn rescan_commit(
        &self,
        repository_id: &str,
        commit_sha: &str,
    ) -> Result<(), AppError> {
        GitCommit::require(&self.db, commit_sha).await?;
        let payload = StagePayload::commit(repository_id, commit_sha);
        for stage in StageKind::commit_roots() {
            self.enqueue_stage(stage, &payload).await?;
        }

        info!(repository_id, commit_sha, "commit rescan enqueued");
        Ok(())
    }

    pub async fn enqueue_delete_repository(&self, repository_id: &str) -> Result<(), AppError> {
        Repository::require(&self.db, repository_id).await?;
        self.ensure_root_status().await?;
        self.enqueue_stage(
            StageKind::DeleteRepository,
            &StagePayload::repository(repository_id),
        )
        .await?;

        info!(repository_id, "repository deletion enqueued");
        Ok(())
    }

    async fn ensure_root_status(&self) -> Result<(), AppError> {
        if TaskStatus::get(&self.db, "kodit.root").await?.is_none() {
            TaskStatus::create_pending(
                &self.db,
                TaskStatus::new("kodit.root".to_string(), "kodit.root", None, None),
            )
            .await?;
        }
        Ok(())
    }

    /// Enqueue one stage and create its pending status row. An existing
    /// dedup key leaves both the queue row and the status untouched.
    pub(crate) async fn enqueue_stage(
        &self,
        stage: StageKind,
        payload: &StagePayload,
    ) -> Result<bool, AppError> {
        let dedup_key = stage.dedup_key(payload);
        let (_task, created) = QueueTask::enqueue(
            &self.db,
            &dedup_key,
            stage.task_type(),
            serde_json::to_value(payload)?,
            stage.priority(),
        )
        .await?;

        if created {
            let status = TaskStatus::new(
                stage.status_id(payload),
                stage.task_type(),
                Some(("repository", &payload.repository_id)),
                stage.status_parent(payload),
            );
            TaskStatus::create_pending(&self.db, status).await?;
        }

        Ok(created)
    }

    /// Run one claimed queue task to a terminal status.
    #[tracing::instrument(skip_all, fields(task_id = %task.id, task_type = %task.task_type))]
    pub async fn process_task(&self, task: QueueTask) -> Result<(), AppError> {
        let Some(stage) = StageKind::from_task_type(&task.task_type) else {
            warn!(task_type = %task.task_type, "unknown task type; dropping task");
            QueueTask::fail(&self.db, &task.id).await?;
            return Err(AppError::Validation(format!(
                "unknown task type {}",
                task.task_type
            )));
        };
        let payload: StagePayload = serde_json::from_value(task.payload.clone())?;
        let status_id = stage.status_id(&payload);

        if TaskStatus::get(&self.db, &status_id).await?.is_none() {
            TaskStatus::create_pending(
                &self.db,
                TaskStatus::new(
                    status_id.clone(),
                    stage.task_type(),
                    Some(("repository", &payload.repository_id)),
                    stage.status_parent(&payload),
                ),
            )
            .await?;
        }

        // At-least-once delivery: a redelivered task whose status already
        // reached a terminal state has nothing left to do.
        match TaskStatus::transition(&self.db, &status_id, TaskState::Running, None, None).await {
            Ok(()) => {}
            Err(AppError::Validation(_)) => {
                info!(status_id, "stage already terminal; dropping redelivery");
                QueueTask::complete(&self.db, &task.id).await?;
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        match self.run_stage(stage, &payload).await {
            Ok(StageOutcome::Completed(message)) => {
                info!(status_id, message, "stage completed");
                TaskStatus::transition(
                    &self.db,
                    &status_id,
                    TaskState::Completed,
                    Some(message),
                    None,
                )
                .await?;
                self.enqueue_dependents(stage, &payload).await?;
                QueueTask::complete(&self.db, &task.id).await?;
                Ok(())
            }
            Ok(StageOutcome::Skipped(message)) => {
                info!(status_id, message, "stage skipped");
                TaskStatus::transition(
                    &self.db,
                    &status_id,
                    TaskState::Skipped,
                    Some(message),
                    None,
                )
                .await?;
                // A skip means the stage's outputs already exist, so its
                // dependents still get their turn.
                self.enqueue_dependents(stage, &payload).await?;
                QueueTask::complete(&self.db, &task.id).await?;
                Ok(())
            }
            Err(err) => {
                warn!(status_id, error = %err, "stage failed");
                let transition = TaskStatus::transition(
                    &self.db,
                    &status_id,
                    TaskState::Failed,
                    None,
                    Some(err.to_string()),
                )
                .await;
                if let Err(transition_err) = transition {
                    warn!(status_id, error = %transition_err, "failed to record stage failure");
                }
                QueueTask::fail(&self.db, &task.id).await?;
                Err(err)
            }
        }
    }

    async fn enqueue_dependents(
        &self,
        stage: StageKind,
        payload: &StagePayload,
    ) -> Result<(), AppError> {
        for dependent in stage.dependents() {
            self.enqueue_stage(*dependent, payload).await?;
        }
        Ok(())
    }

    async fn run_stage(
        &self,
        stage: StageKind,
        payload: &StagePayload,
    ) -> Result<StageOutcome, AppError> {
        match stage {
            StageKind::Clone => git::clone_repository(self, payload).await,
            StageKind::Scan => git::scan_repository(self, payload).await,
            StageKind::ExtractSnippets => indexing::extract_snippets(self, payload).await,
            StageKind::CreateBm25Index => indexing::create_bm25_index(self, payload).await,
            StageKind::CreateCodeEmbeddings => indexing::create_code_embeddings(self, payload).await,
            StageKind::CreateSummaryEnrichment => {
                enrichments::create_summary_enrichment(self, payload).await
            }
            StageKind::CreateSummaryEmbeddings => {
                enrichments::create_summary_embeddings(self, payload).await
            }
            StageKind::CreatePublicApiDocs => {
                enrichments::create_public_api_docs(self, payload).await
            }
            StageKind::ExtractExamples => examples::extract_examples(self, payload).await,
            StageKind::CreateExampleSummary => {
                examples::create_example_summary(self, payload).await
            }
            StageKind::CreateExampleSummaryEmbeddings => {
                examples::create_example_summary_embeddings(self, payload).await
            }
            StageKind::CreateExampleCodeEmbeddings => {
                examples::create_example_code_embeddings(self, payload).await
            }
            StageKind::CreateCommitDescription => {
                enrichments::create_commit_description(self, payload).await
            }
            StageKind::CreateArchitectureEnrichment => {
                enrichments::create_architecture_enrichment(self, payload).await
            }
            StageKind::CreateCookbook => enrichments::create_cookbook(self, payload).await,
            StageKind::CreateDatabaseSchema => {
                enrichments::create_database_schema(self, payload).await
            }
            StageKind::DeleteRepository => delete::delete_repository(self, payload).await,
        }
    }

    pub(crate) fn require_commit_sha<'a>(
        &self,
        payload: &'a StagePayload,
    ) -> Result<&'a str, AppError> {
        payload
            .commit_sha
            .as_deref()
            .ok_or_else(|| AppError::Validation("stage payload is missing a commit sha".into()))
    }

    pub(crate) async fn require_cloned_repository(
        &self,
        repository_id: &str,
    ) -> Result<(Repository, PathBuf), AppError> {
        let repository = Repository::require(&self.db, repository_id).await?;
        let clone_path = repository
            .clone_path
            .clone()
            .ok_or_else(|| {
                AppError::Validation(format!("repository {repository_id} has not been cloned"))
            })?;
        Ok((repository, PathBuf::from(clone_path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enricher::TextGenerator;
    use crate::scanner::GitScanner;
    use async_trait::async_trait;
    use common::storage::indexes::{ensure_runtime_indexes, ensure_schema_indexes};
    use common::storage::types::enrichment::{Enrichment, EnrichmentSubtype, EnrichmentType};
    use common::storage::types::enrichment_association::EntityKind;
    use common::storage::types::repository::TrackingConfig;
    use common::storage::types::snippet::{content_sha, Snippet};
    use retrieval_pipeline::{fts, vector, vector::EmbeddingTable};
    use std::path::Path;
    use std::time::Duration;
    use uuid::Uuid;

    const DIM: usize = 8;

    /// Deterministic stand-in for the chat capability.
    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, _system_prompt: &str, text: &str) -> Result<String, AppError> {
            let prefix: String = text.chars().take(32).collect();
            Ok(format!("Generated notes for: {prefix}"))
        }
    }

    /// Build the on-disk fixture repository the pipeline ingests.
    fn fixture_repo(dir: &Path) -> String {
        let repo = git2::Repository::init(dir).expect("init should succeed");
        std::fs::create_dir_all(dir.join("src")).expect("mkdir src");
        std::fs::create_dir_all(dir.join("examples")).expect("mkdir examples");
        std::fs::write(dir.join("src/math.py"), "def add(a,b): return a+b\n")
            .expect("write math.py");
        std::fs::write(
            dir.join("examples/quickstart.py"),
            "from math import add\nprint(add(1, 2))\n",
        )
        .expect("write quickstart.py");
        std::fs::write(
            dir.join("schema.sql"),
            "CREATE TABLE snippets (id TEXT PRIMARY KEY);\n",
        )
        .expect("write schema.sql");
        std::fs::write(dir.join("README.md"), "# fixture\n").expect("write README.md");

        let mut index = repo.index().expect("index should open");
        for path in [
            "src/math.py",
            "examples/quickstart.py",
            "schema.sql",
            "README.md",
        ] {
            index.add_path(Path::new(path)).expect("add should succeed");
        }
        index.write().expect("index write");
        let tree_id = index.write_tree().expect("tree write");
        let tree = repo.find_tree(tree_id).expect("tree should exist");
        let signature = git2::Signature::now("Ada", "ada@example.com").expect("signature");
        let commit = repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                "add math helpers",
                &tree,
                &[],
            )
            .expect("commit should succeed");

        commit.to_string()
    }

    struct Fixture {
        db: Arc<SurrealDbClient>,
        pipeline: IngestionPipeline,
        repository: Repository,
        commit_sha: String,
        // Held so the fixture repo and clone root outlive the test body.
        _remote_dir: tempfile::TempDir,
        _clone_root: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let remote_dir = tempfile::tempdir().expect("tempdir");
        let commit_sha = fixture_repo(remote_dir.path());
        let clone_root = tempfile::tempdir().expect("tempdir");

        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("pipeline_test_ns", &database)
                .await
                .expect("failed to create in-memory surreal"),
        );
        ensure_schema_indexes(&db).await.expect("schema indexes");
        ensure_runtime_indexes(&db, DIM)
            .await
            .expect("runtime indexes");

        let remote_uri = format!("file://{}", remote_dir.path().display());
        let (repository, created) =
            Repository::find_or_create(&db, &remote_uri, TrackingConfig::default())
                .await
                .expect("repository should persist");
        assert!(created);

        let embedder = Arc::new(common::utils::embedding::EmbeddingProvider::hashed(DIM));
        let services = PipelineServices {
            scanner: Arc::new(GitScanner::new()),
            generator: Arc::new(EchoGenerator),
            code_embedder: Arc::clone(&embedder),
            text_embedder: embedder,
        };
        let config = IngestionConfig {
            clone_root: clone_root.path().to_path_buf(),
            enrichment_parallelism: 2,
            max_failure_rate: 0.0,
        };
        let pipeline = IngestionPipeline::new(Arc::clone(&db), services, config);

        Fixture {
            db,
            pipeline,
            repository,
            commit_sha,
            _remote_dir: remote_dir,
            _clone_root: clone_root,
        }
    }

    /// Claim and run queued tasks until the queue drains.
    async fn drain(fixture: &Fixture) {
        loop {
            let task = QueueTask::claim_next_ready(
                &fixture.db,
                "test-worker",
                chrono::Utc::now(),
                Duration::from_secs(60),
            )
            .await
            .expect("claim should succeed");
            let Some(task) = task else { break };
            fixture
                .pipeline
                .process_task(task)
                .await
                .expect("stage should succeed");
        }
    }

    #[tokio::test]
    async fn ingests_a_repository_end_to_end() {
        let fixture = fixture().await;
        fixture
            .pipeline
            .enqueue_repository(&fixture.repository.id)
            .await
            .expect("enqueue should succeed");

        drain(&fixture).await;

        // Every stage reached a terminal state and nothing failed.
        let statuses =
            TaskStatus::list_for_trackable(&fixture.db, "repository", &fixture.repository.id)
                .await
                .expect("statuses should list");
        assert!(!statuses.is_empty());
        assert!(statuses.iter().all(|status| status.state.is_terminal()));
        assert!(statuses
            .iter()
            .all(|status| status.state != TaskState::Failed));

        // The one-line python file became exactly one content-addressed
        // snippet.
        let expected_sha = content_sha("def add(a,b): return a+b\n");
        let snippet = Snippet::require(&fixture.db, &expected_sha)
            .await
            .expect("snippet should exist");
        assert_eq!(snippet.extension, "py");
        assert_eq!(snippet.derives_from.len(), 1);
        assert_eq!(snippet.derives_from[0].path, "src/math.py");

        // Keyword search reaches it.
        let hits = fts::search(&fixture.db, "add", 10, None)
            .await
            .expect("search should succeed");
        assert!(hits.iter().any(|hit| hit.snippet_id == expected_sha));

        // Code embeddings landed in the vector table.
        let embedded = vector::search(
            &fixture.db,
            EmbeddingTable::Code,
            vec![0.5; DIM],
            10,
            None,
        )
        .await
        .expect("vector search should succeed");
        assert!(!embedded.is_empty());

        // The snippet carries a summary; the commit carries the single-shot
        // enrichments, including the schema docs for schema.sql.
        let summaries = Enrichment::list_for_entity(
            &fixture.db,
            EntityKind::Snippet,
            &expected_sha,
            Some(EnrichmentType::Usage),
            Some(EnrichmentSubtype::SnippetSummary),
        )
        .await
        .expect("summaries should list");
        assert_eq!(summaries.len(), 1);

        for subtype in [
            EnrichmentSubtype::CommitDescription,
            EnrichmentSubtype::Physical,
            EnrichmentSubtype::Cookbook,
            EnrichmentSubtype::ApiDocs,
            EnrichmentSubtype::DatabaseSchema,
        ] {
            let rows = Enrichment::list_for_entity(
                &fixture.db,
                EntityKind::GitCommits,
                &fixture.commit_sha,
                None,
                Some(subtype),
            )
            .await
            .expect("enrichments should list");
            assert_eq!(rows.len(), 1, "missing commit enrichment {subtype:?}");
        }

        // The example file became an example-marked snippet.
        let example_sha = content_sha("from math import add\nprint(add(1, 2))\n");
        let markers = Enrichment::list_for_entity(
            &fixture.db,
            EntityKind::Snippet,
            &example_sha,
            Some(EnrichmentType::Usage),
            Some(EnrichmentSubtype::Example),
        )
        .await
        .expect("markers should list");
        assert_eq!(markers.len(), 1);
    }

    #[tokio::test]
    async fn rescan_recomputes_without_duplicating_rows() {
        let fixture = fixture().await;
        fixture
            .pipeline
            .enqueue_repository(&fixture.repository.id)
            .await
            .expect("enqueue should succeed");
        drain(&fixture).await;

        let expected_sha = content_sha("def add(a,b): return a+b\n");
        let before = Snippet::require(&fixture.db, &expected_sha)
            .await
            .expect("snippet should exist");

        fixture
            .pipeline
            .rescan_commit(&fixture.repository.id, &fixture.commit_sha)
            .await
            .expect("rescan should enqueue");
        drain(&fixture).await;

        // Content addressing held: same sha, same creation time, one row.
        let after = Snippet::require(&fixture.db, &expected_sha)
            .await
            .expect("snippet should exist");
        assert_eq!(before.created_at, after.created_at);
        assert!(after.updated_at >= before.updated_at);

        let summaries = Enrichment::list_for_entity(
            &fixture.db,
            EntityKind::Snippet,
            &expected_sha,
            Some(EnrichmentType::Usage),
            Some(EnrichmentSubtype::SnippetSummary),
        )
        .await
        .expect("summaries should list");
        assert_eq!(summaries.len(), 1, "rescan must not duplicate summaries");
    }

    #[tokio::test]
    async fn delete_repository_removes_the_tree_and_indexes() {
        let fixture = fixture().await;
        fixture
            .pipeline
            .enqueue_repository(&fixture.repository.id)
            .await
            .expect("enqueue should succeed");
        drain(&fixture).await;

        fixture
            .pipeline
            .enqueue_delete_repository(&fixture.repository.id)
            .await
            .expect("delete should enqueue");
        drain(&fixture).await;

        assert!(Repository::get_by_remote_uri(
            &fixture.db,
            &fixture.repository.remote_uri
        )
        .await
        .expect("lookup should succeed")
        .is_none());

        let expected_sha = content_sha("def add(a,b): return a+b\n");
        assert!(Snippet::get(&fixture.db, &expected_sha)
            .await
            .expect("lookup should succeed")
            .is_none());

        let hits = fts::search(&fixture.db, "add", 10, None)
            .await
            .expect("search should succeed");
        assert!(hits.is_empty());

        let embedded = vector::search(
            &fixture.db,
            EmbeddingTable::Code,
            vec![0.5; DIM],
            10,
            None,
        )
        .await
        .expect("vector search should succeed");
        assert!(embedded.is_empty());

        // Only the delete stage's own terminal status survives.
        let statuses =
            TaskStatus::list_for_trackable(&fixture.db, "repository", &fixture.repository.id)
                .await
                .expect("statuses should list");
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, TaskState::Completed);
    }

    #[tokio::test]
    async fn enqueue_is_deduplicated_per_stage() {
        let fixture = fixture().await;

        fixture
            .pipeline
            .enqueue_repository(&fixture.repository.id)
            .await
            .expect("first enqueue should succeed");
        fixture
            .pipeline
            .enqueue_repository(&fixture.repository.id)
            .await
            .expect("second enqueue should succeed");

        let tasks = QueueTask::list(&fixture.db).await.expect("list tasks");
        assert_eq!(tasks.len(), 1, "clone task must not be duplicated");
    }
}
