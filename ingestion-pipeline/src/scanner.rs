use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use common::{
    error::AppError,
    storage::types::repository::{TrackingConfig, TrackingMode},
};

/// How far back the history walk goes from the tracked commit.
const MAX_HISTORY_DEPTH: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub sha: String,
    pub parent_sha: Option<String>,
    pub author: String,
    pub authored_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefInfo {
    pub name: String,
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub path: String,
    pub blob_sha: String,
    pub size: u64,
}

/// Everything a scan yields: the commit the tracking config resolves to, its
/// ancestry, the repository's refs, and the tracked commit's file tree.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub tracked_sha: String,
    pub commits: Vec<CommitInfo>,
    pub branches: Vec<RefInfo>,
    pub tags: Vec<RefInfo>,
    pub files: Vec<FileEntry>,
}

/// Git access behind a seam: the pipeline only needs clone, scan and blob
/// reads, and tests substitute a fixture scanner.
#[async_trait]
pub trait RepoScanner: Send + Sync {
    async fn clone_or_open(&self, remote_uri: &str, destination: &Path) -> Result<(), AppError>;

    async fn scan(
        &self,
        clone_path: &Path,
        tracking: &TrackingConfig,
    ) -> Result<ScanOutput, AppError>;

    /// File content at a commit; `None` for binary or missing files.
    async fn read_file(
        &self,
        clone_path: &Path,
        commit_sha: &str,
        path: &str,
    ) -> Result<Option<String>, AppError>;
}

/// libgit2-backed scanner. All git work runs on the blocking pool.
pub struct GitScanner;

impl GitScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GitScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn git_err(err: git2::Error) -> AppError {
    AppError::Git(err.to_string())
}

fn commit_info(commit: &git2::Commit<'_>) -> CommitInfo {
    let author = commit.author();
    let authored_at = Utc
        .timestamp_opt(author.when().seconds(), 0)
        .single()
        .unwrap_or_else(Utc::now);
    let name = author.name().unwrap_or("unknown");
    let email = author.email().unwrap_or("unknown");

    CommitInfo {
        sha: commit.id().to_string(),
        parent_sha: commit.parent_id(0).ok().map(|id| id.to_string()),
        author: format!("{name} <{email}>"),
        authored_at,
        message: commit.message().unwrap_or_default().trim().to_string(),
    }
}

fn resolve_tracked_commit(
    repo: &git2::Repository,
    tracking: &TrackingConfig,
) -> Result<git2::Oid, AppError> {
    match tracking.mode {
        TrackingMode::Commit => {
            git2::Oid::from_str(&tracking.value).map_err(git_err)
        }
        TrackingMode::Tag => {
            let reference = format!("refs/tags/{}", tracking.value);
            let object = repo
                .revparse_single(&reference)
                .map_err(git_err)?
                .peel_to_commit()
                .map_err(git_err)?;
            Ok(object.id())
        }
        TrackingMode::Branch => {
            if tracking.value.is_empty() {
                // The remote default branch is whatever HEAD points at.
                let head = repo.head().map_err(git_err)?;
                return head
                    .peel_to_commit()
                    .map(|commit| commit.id())
                    .map_err(git_err);
            }
            let candidates = [
                format!("refs/heads/{}", tracking.value),
                format!("refs/remotes/origin/{}", tracking.value),
            ];
            for candidate in &candidates {
                if let Ok(object) = repo.revparse_single(candidate) {
                    return object.peel_to_commit().map(|c| c.id()).map_err(git_err);
                }
            }
            Err(AppError::NotFound(format!(
                "branch {} not found",
                tracking.value
            )))
        }
    }
}

fn scan_blocking(clone_path: PathBuf, tracking: TrackingConfig) -> Result<ScanOutput, AppError> {
    let repo = git2::Repository::open(&clone_path).map_err(git_err)?;
    let tracked_oid = resolve_tracked_commit(&repo, &tracking)?;

    let mut revwalk = repo.revwalk().map_err(git_err)?;
    revwalk.push(tracked_oid).map_err(git_err)?;
    let mut commits = Vec::new();
    for oid in revwalk.take(MAX_HISTORY_DEPTH) {
        let oid = oid.map_err(git_err)?;
        let commit = repo.find_commit(oid).map_err(git_err)?;
        commits.push(commit_info(&commit));
    }

    let mut branches = Vec::new();
    for branch in repo
        .branches(Some(git2::BranchType::Local))
        .map_err(git_err)?
    {
        let (branch, _kind) = branch.map_err(git_err)?;
        let Some(name) = branch.name().map_err(git_err)? else {
            continue;
        };
        if let Some(target) = branch.get().target() {
            branches.push(RefInfo {
                name: name.to_string(),
                sha: target.to_string(),
            });
        }
    }

    let mut tags = Vec::new();
    repo.tag_foreach(|oid, name_bytes| {
        let name = String::from_utf8_lossy(name_bytes)
            .trim_start_matches("refs/tags/")
            .to_string();
        let sha = repo
            .find_tag(oid)
            .map(|tag| tag.target_id().to_string())
            .unwrap_or_else(|_| oid.to_string());
        tags.push(RefInfo { name, sha });
        true
    })
    .map_err(git_err)?;

    let tracked_commit = repo.find_commit(tracked_oid).map_err(git_err)?;
    let tree = tracked_commit.tree().map_err(git_err)?;
    let mut files = Vec::new();
    tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() == Some(git2::ObjectType::Blob) {
            let path = format!("{dir}{}", entry.name().unwrap_or_default());
            let size = repo
                .find_blob(entry.id())
                .map(|blob| blob.size() as u64)
                .unwrap_or(0);
            files.push(FileEntry {
                path,
                blob_sha: entry.id().to_string(),
                size,
            });
        }
        git2::TreeWalkResult::Ok
    })
    .map_err(git_err)?;

    debug!(
        tracked = %tracked_oid,
        commits = commits.len(),
        branches = branches.len(),
        tags = tags.len(),
        files = files.len(),
        "repository scan finished"
    );

    Ok(ScanOutput {
        tracked_sha: tracked_oid.to_string(),
        commits,
        branches,
        tags,
        files,
    })
}

fn read_file_blocking(
    clone_path: PathBuf,
    commit_sha: String,
    path: String,
) -> Result<Option<String>, AppError> {
    let repo = git2::Repository::open(&clone_path).map_err(git_err)?;
    let oid = git2::Oid::from_str(&commit_sha).map_err(git_err)?;
    let commit = repo.find_commit(oid).map_err(git_err)?;
    let tree = commit.tree().map_err(git_err)?;

    let entry = match tree.get_path(Path::new(&path)) {
        Ok(entry) => entry,
        Err(err) if err.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(err) => return Err(git_err(err)),
    };
    let blob = repo.find_blob(entry.id()).map_err(git_err)?;
    if blob.is_binary() {
        return Ok(None);
    }

    Ok(std::str::from_utf8(blob.content())
        .ok()
        .map(str::to_string))
}

#[async_trait]
impl RepoScanner for GitScanner {
    async fn clone_or_open(&self, remote_uri: &str, destination: &Path) -> Result<(), AppError> {
        let remote_uri = remote_uri.to_string();
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || {
            if destination.join(".git").exists() || destination.join("HEAD").exists() {
                let repo = git2::Repository::open(&destination).map_err(git_err)?;
                // Refresh refs; failure to fetch leaves the previous state
                // usable, so only log it.
                if let Ok(mut remote) = repo.find_remote("origin") {
                    if let Err(err) = remote.fetch(&[] as &[&str], None, None) {
                        warn!(error = %err, "fetch failed; scanning existing clone");
                    }
                }
                return Ok(());
            }

            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            git2::Repository::clone(&remote_uri, &destination)
                .map(|_| ())
                .map_err(git_err)
        })
        .await?
    }

    async fn scan(
        &self,
        clone_path: &Path,
        tracking: &TrackingConfig,
    ) -> Result<ScanOutput, AppError> {
        let clone_path = clone_path.to_path_buf();
        let tracking = tracking.clone();
        tokio::task::spawn_blocking(move || scan_blocking(clone_path, tracking)).await?
    }

    async fn read_file(
        &self,
        clone_path: &Path,
        commit_sha: &str,
        path: &str,
    ) -> Result<Option<String>, AppError> {
        let clone_path = clone_path.to_path_buf();
        let commit_sha = commit_sha.to_string();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || read_file_blocking(clone_path, commit_sha, path))
            .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a one-commit repository on disk and return its path.
    fn fixture_repo(dir: &Path) -> String {
        let repo = git2::Repository::init(dir).expect("init should succeed");
        std::fs::create_dir_all(dir.join("src")).expect("mkdir should succeed");
        std::fs::write(dir.join("src/math.py"), "def add(a,b): return a+b\n")
            .expect("write should succeed");
        std::fs::write(dir.join("README.md"), "# fixture\n").expect("write should succeed");

        let mut index = repo.index().expect("index should open");
        index
            .add_path(Path::new("src/math.py"))
            .expect("add should succeed");
        index
            .add_path(Path::new("README.md"))
            .expect("add should succeed");
        index.write().expect("index write should succeed");
        let tree_id = index.write_tree().expect("tree write should succeed");
        let tree = repo.find_tree(tree_id).expect("tree should exist");
        let signature =
            git2::Signature::now("Ada", "ada@example.com").expect("signature should build");
        let commit = repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                "initial commit",
                &tree,
                &[],
            )
            .expect("commit should succeed");

        commit.to_string()
    }

    #[tokio::test]
    async fn scans_the_default_branch_head() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sha = fixture_repo(dir.path());

        let scanner = GitScanner::new();
        let output = scanner
            .scan(dir.path(), &TrackingConfig::default())
            .await
            .expect("scan should succeed");

        assert_eq!(output.tracked_sha, sha);
        assert_eq!(output.commits.len(), 1);
        assert_eq!(output.commits[0].message, "initial commit");
        assert!(output.commits[0].author.contains("ada@example.com"));
        assert_eq!(output.files.len(), 2);
        assert!(output
            .files
            .iter()
            .any(|file| file.path == "src/math.py" && file.size > 0));
    }

    #[tokio::test]
    async fn reads_file_contents_at_a_commit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sha = fixture_repo(dir.path());

        let scanner = GitScanner::new();
        let content = scanner
            .read_file(dir.path(), &sha, "src/math.py")
            .await
            .expect("read should succeed");
        assert_eq!(content.as_deref(), Some("def add(a,b): return a+b\n"));

        let missing = scanner
            .read_file(dir.path(), &sha, "src/absent.py")
            .await
            .expect("read should succeed");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn tracking_a_pinned_commit_resolves_it_directly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sha = fixture_repo(dir.path());

        let scanner = GitScanner::new();
        let output = scanner
            .scan(
                dir.path(),
                &TrackingConfig {
                    mode: TrackingMode::Commit,
                    value: sha.clone(),
                },
            )
            .await
            .expect("scan should succeed");
        assert_eq!(output.tracked_sha, sha);
    }

    #[tokio::test]
    async fn clone_or_open_accepts_an_existing_clone() {
        let dir = tempfile::tempdir().expect("tempdir");
        fixture_repo(dir.path());

        let scanner = GitScanner::new();
        scanner
            .clone_or_open("file:///unused", dir.path())
            .await
            .expect("open should succeed");
    }
}
