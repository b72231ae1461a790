use serde::{Deserialize, Serialize};

pub mod delete;
pub mod enrichments;
pub mod examples;
pub mod git;
pub mod indexing;

/// Opaque task payload carried on the queue: which repository, and for
/// commit-scoped stages, which commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagePayload {
    pub repository_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

impl StagePayload {
    pub fn repository(repository_id: &str) -> Self {
        Self {
            repository_id: repository_id.to_string(),
            commit_sha: None,
        }
    }

    pub fn commit(repository_id: &str, commit_sha: &str) -> Self {
        Self {
            repository_id: repository_id.to_string(),
            commit_sha: Some(commit_sha.to_string()),
        }
    }
}

/// What a stage reports back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed(String),
    /// Re-runs with nothing left to do end here.
    Skipped(String),
}

/// Every stage of the ingestion DAG, plus repository deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Clone,
    Scan,
    ExtractSnippets,
    CreateBm25Index,
    CreateCodeEmbeddings,
    CreateSummaryEnrichment,
    CreateSummaryEmbeddings,
    CreatePublicApiDocs,
    ExtractExamples,
    CreateExampleSummary,
    CreateExampleSummaryEmbeddings,
    CreateExampleCodeEmbeddings,
    CreateCommitDescription,
    CreateArchitectureEnrichment,
    CreateCookbook,
    CreateDatabaseSchema,
    DeleteRepository,
}

impl StageKind {
    pub const ALL: [StageKind; 17] = [
        StageKind::Clone,
        StageKind::Scan,
        StageKind::ExtractSnippets,
        StageKind::CreateBm25Index,
        StageKind::CreateCodeEmbeddings,
        StageKind::CreateSummaryEnrichment,
        StageKind::CreateSummaryEmbeddings,
        StageKind::CreatePublicApiDocs,
        StageKind::ExtractExamples,
        StageKind::CreateExampleSummary,
        StageKind::CreateExampleSummaryEmbeddings,
        StageKind::CreateExampleCodeEmbeddings,
        StageKind::CreateCommitDescription,
        StageKind::CreateArchitectureEnrichment,
        StageKind::CreateCookbook,
        StageKind::CreateDatabaseSchema,
        StageKind::DeleteRepository,
    ];

    pub fn task_type(self) -> &'static str {
        match self {
            Self::Clone => "kodit.repository.clone",
            Self::Scan => "kodit.repository.scan",
            Self::ExtractSnippets => "kodit.commit.extract_snippets",
            Self::CreateBm25Index => "kodit.commit.create_bm25_index",
            Self::CreateCodeEmbeddings => "kodit.commit.create_code_embeddings",
            Self::CreateSummaryEnrichment => "kodit.commit.create_summary_enrichment",
            Self::CreateSummaryEmbeddings => "kodit.commit.create_summary_embeddings",
            Self::CreatePublicApiDocs => "kodit.commit.create_public_api_docs",
            Self::ExtractExamples => "kodit.commit.extract_examples",
            Self::CreateExampleSummary => "kodit.commit.create_example_summary",
            Self::CreateExampleSummaryEmbeddings => {
                "kodit.commit.create_example_summary_embeddings"
            }
            Self::CreateExampleCodeEmbeddings => "kodit.commit.create_example_code_embeddings",
            Self::CreateCommitDescription => "kodit.commit.create_commit_description",
            Self::CreateArchitectureEnrichment => "kodit.commit.create_architecture_enrichment",
            Self::CreateCookbook => "kodit.commit.create_cookbook",
            Self::CreateDatabaseSchema => "kodit.commit.create_database_schema",
            Self::DeleteRepository => "kodit.repository.delete",
        }
    }

    pub fn from_task_type(task_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.task_type() == task_type)
    }

    /// Higher runs earlier. Upstream stages outrank their dependents so a
    /// drained queue always makes forward progress through the DAG.
    pub fn priority(self) -> i64 {
        match self {
            Self::Clone | Self::DeleteRepository => 100,
            Self::Scan => 90,
            Self::ExtractSnippets => 80,
            Self::ExtractExamples => 78,
            Self::CreateBm25Index => 70,
            Self::CreateCodeEmbeddings => 68,
            Self::CreateSummaryEnrichment => 62,
            Self::CreateCommitDescription | Self::CreateArchitectureEnrichment => 60,
            Self::CreatePublicApiDocs => 58,
            Self::CreateCookbook | Self::CreateDatabaseSchema => 55,
            Self::CreateExampleSummary => 52,
            Self::CreateSummaryEmbeddings | Self::CreateExampleCodeEmbeddings => 50,
            Self::CreateExampleSummaryEmbeddings => 45,
        }
    }

    /// Stages enqueued with the same payload once this stage completes.
    /// Scan fans out to the per-commit roots itself, because only the scan
    /// learns which commit the tracking config resolves to.
    pub fn dependents(self) -> &'static [StageKind] {
        match self {
            Self::Clone => &[Self::Scan],
            Self::ExtractSnippets => &[
                Self::CreateBm25Index,
                Self::CreateCodeEmbeddings,
                Self::CreateSummaryEnrichment,
                Self::CreatePublicApiDocs,
            ],
            Self::CreateSummaryEnrichment => &[Self::CreateSummaryEmbeddings],
            Self::ExtractExamples => &[
                Self::CreateExampleSummary,
                Self::CreateExampleCodeEmbeddings,
            ],
            Self::CreateExampleSummary => &[Self::CreateExampleSummaryEmbeddings],
            _ => &[],
        }
    }

    /// The stages scan enqueues for the tracked commit.
    pub fn commit_roots() -> [StageKind; 6] {
        [
            Self::ExtractSnippets,
            Self::ExtractExamples,
            Self::CreateCommitDescription,
            Self::CreateArchitectureEnrichment,
            Self::CreateCookbook,
            Self::CreateDatabaseSchema,
        ]
    }

    pub fn is_commit_scoped(self) -> bool {
        self.task_type().starts_with("kodit.commit.")
    }

    /// Queue dedup key, shaped `kodit.<entity>-<id>-<stage>`.
    pub fn dedup_key(self, payload: &StagePayload) -> String {
        match (&payload.commit_sha, self.is_commit_scoped()) {
            (Some(sha), true) => format!("kodit.commit-{sha}-{}", self.task_type()),
            _ => format!(
                "kodit.repository-{}-{}",
                payload.repository_id,
                self.task_type()
            ),
        }
    }

    /// Status row id, shaped `<scope>-<id>-<operation>`.
    pub fn status_id(self, payload: &StagePayload) -> String {
        match (&payload.commit_sha, self.is_commit_scoped()) {
            (Some(sha), true) => format!("commit-{sha}-{}", self.task_type()),
            _ => format!(
                "repository-{}-{}",
                payload.repository_id,
                self.task_type()
            ),
        }
    }

    /// Parent link in the status tree, rooted at `kodit.root`.
    pub fn status_parent(self, payload: &StagePayload) -> Option<String> {
        if self.is_commit_scoped() {
            Some(format!(
                "repository-{}-{}",
                payload.repository_id,
                Self::Scan.task_type()
            ))
        } else {
            Some("kodit.root".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_types_round_trip() {
        for stage in StageKind::ALL {
            assert_eq!(StageKind::from_task_type(stage.task_type()), Some(stage));
        }
        assert_eq!(StageKind::from_task_type("kodit.unknown"), None);
    }

    #[test]
    fn dedup_and_status_ids_encode_scope() {
        let repo_payload = StagePayload::repository("7");
        assert_eq!(
            StageKind::Clone.dedup_key(&repo_payload),
            "kodit.repository-7-kodit.repository.clone"
        );
        assert_eq!(
            StageKind::Clone.status_id(&repo_payload),
            "repository-7-kodit.repository.clone"
        );

        let sha = "a".repeat(40);
        let commit_payload = StagePayload::commit("7", &sha);
        assert_eq!(
            StageKind::ExtractSnippets.dedup_key(&commit_payload),
            format!("kodit.commit-{sha}-kodit.commit.extract_snippets")
        );
        assert_eq!(
            StageKind::ExtractSnippets.status_parent(&commit_payload),
            Some("repository-7-kodit.repository.scan".to_string())
        );
    }

    #[test]
    fn the_dag_is_acyclic_and_upstream_outranks_downstream() {
        for stage in StageKind::ALL {
            for dependent in stage.dependents() {
                assert!(
                    stage.priority() > dependent.priority(),
                    "{:?} must outrank {:?}",
                    stage,
                    dependent
                );
                // One level of lookahead is enough here; the DAG is shallow.
                assert!(!dependent.dependents().contains(&stage));
            }
        }
    }
}
