//! GitHub API data types.
//!
//! Public types are what the publish pipeline works with; the `*Response`
//! types mirror the REST payloads and are converted at the client boundary.

use serde::{Deserialize, Serialize};

/// Regular (non-executable) file mode for blobs written by the pipeline.
pub const FILE_MODE: &str = "100644";

/// A repository the installation can access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryInfo {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
}

impl RepositoryInfo {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// A git commit object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub tree_sha: String,
    pub message: String,
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeEntryKind {
    Blob,
    Tree,
    /// A submodule.
    Commit,
}

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: TreeEntryKind,
    pub sha: String,
}

impl TreeEntry {
    /// Symlinks are blobs with mode 120000.
    pub fn is_regular_blob(&self) -> bool {
        self.kind == TreeEntryKind::Blob && self.mode != "120000"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Tree {
    pub sha: String,
    #[serde(rename = "tree")]
    pub entries: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

/// An entry for `POST /git/trees`. A `sha` of `None` deletes the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTreeEntry {
    pub path: String,
    pub mode: &'static str,
    #[serde(rename = "type")]
    pub kind: TreeEntryKind,
    pub sha: Option<String>,
}

impl NewTreeEntry {
    pub fn upsert(path: impl Into<String>, blob_sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FILE_MODE,
            kind: TreeEntryKind::Blob,
            sha: Some(blob_sha.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FILE_MODE,
            kind: TreeEntryKind::Blob,
            sha: None,
        }
    }
}

/// Relationship of `head` to `base` in a compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareStatus {
    Identical,
    Ahead,
    Behind,
    Diverged,
}

/// Result of `GET /compare/{base}...{head}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub status: CompareStatus,
    pub ahead_by: u32,
    pub behind_by: u32,
    /// Commits reachable from head but not from base.
    pub commits: Vec<CommitInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub head_branch: String,
    pub base_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

// ---------- Wire formats ----------

#[derive(Deserialize)]
pub(crate) struct OwnerResponse {
    pub login: String,
}

#[derive(Deserialize)]
pub(crate) struct RepositoryResponse {
    pub name: String,
    pub owner: OwnerResponse,
    pub default_branch: Option<String>,
}

impl From<RepositoryResponse> for RepositoryInfo {
    fn from(repo: RepositoryResponse) -> Self {
        Self {
            owner: repo.owner.login,
            name: repo.name,
            default_branch: repo.default_branch.unwrap_or_else(|| "main".to_string()),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct InstallationRepositoriesResponse {
    pub total_count: usize,
    pub repositories: Vec<RepositoryResponse>,
}

#[derive(Deserialize)]
pub(crate) struct ShaResponse {
    pub sha: String,
}

#[derive(Deserialize)]
pub(crate) struct RefResponse {
    pub object: ShaResponse,
}

#[derive(Deserialize)]
pub(crate) struct GitCommitResponse {
    pub sha: String,
    pub tree: ShaResponse,
    pub message: String,
    #[serde(default)]
    pub parents: Vec<ShaResponse>,
}

impl From<GitCommitResponse> for CommitInfo {
    fn from(commit: GitCommitResponse) -> Self {
        Self {
            sha: commit.sha,
            tree_sha: commit.tree.sha,
            message: commit.message,
            parents: commit.parents.into_iter().map(|p| p.sha).collect(),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct CompareCommitDetail {
    pub message: String,
    pub tree: ShaResponse,
}

#[derive(Deserialize)]
pub(crate) struct CompareCommitResponse {
    pub sha: String,
    pub commit: CompareCommitDetail,
    #[serde(default)]
    pub parents: Vec<ShaResponse>,
}

#[derive(Deserialize)]
pub(crate) struct CompareResponse {
    pub status: CompareStatus,
    pub ahead_by: u32,
    pub behind_by: u32,
    #[serde(default)]
    pub commits: Vec<CompareCommitResponse>,
}

impl From<CompareResponse> for Comparison {
    fn from(cmp: CompareResponse) -> Self {
        Self {
            status: cmp.status,
            ahead_by: cmp.ahead_by,
            behind_by: cmp.behind_by,
            commits: cmp
                .commits
                .into_iter()
                .map(|c| CommitInfo {
                    sha: c.sha,
                    tree_sha: c.commit.tree.sha,
                    message: c.commit.message,
                    parents: c.parents.into_iter().map(|p| p.sha).collect(),
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct PullRefResponse {
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Deserialize)]
pub(crate) struct PullResponse {
    pub number: u64,
    pub html_url: String,
    pub head: PullRefResponse,
    pub base: PullRefResponse,
}

impl From<PullResponse> for PullRequest {
    fn from(pr: PullResponse) -> Self {
        Self {
            number: pr.number,
            url: pr.html_url,
            head_branch: pr.head.ref_name,
            base_branch: pr.base.ref_name,
        }
    }
}
