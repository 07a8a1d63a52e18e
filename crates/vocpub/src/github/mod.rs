//! GitHub REST access for the publish pipeline.
//!
//! [`GitHubApi`] is the port the pipeline talks to. It covers exactly the Git
//! Data, compare and pull request endpoints a publish needs.
//! [`GitHubClient`] implements it over an [`HttpTransport`](crate::http::HttpTransport),
//! with installation auth, pacing and retries built in.
//!
//! # Module Structure
//!
//! - [`error`] - Error types and response classification
//! - [`types`] - Git objects, comparisons and pull requests
//! - [`client`] - The HTTP implementation
//! - [`pagination`] - `Link` header parsing for list endpoints

mod client;
pub mod error;
pub mod pagination;
pub mod types;

use async_trait::async_trait;

pub use client::{DEFAULT_API_URL, GitHubClient};
pub use error::{GitHubError, Result, short_error_message};
pub use types::{
    CommitInfo, CompareStatus, Comparison, NewPullRequest, NewTreeEntry, PullRequest,
    RepositoryInfo, Tree, TreeEntry, TreeEntryKind,
};

/// The GitHub operations used by the publish pipeline.
///
/// Implementations retry transient failures themselves, except for
/// [`create_pull`](GitHubApi::create_pull), which is never retried.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// All repositories the installation is authorized for.
    async fn list_installation_repositories(&self) -> Result<Vec<RepositoryInfo>>;

    /// Commit sha of `refs/heads/{branch}`, or `None` when the branch does not exist.
    async fn get_branch_head(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<String>>;

    async fn get_commit(&self, owner: &str, repo: &str, sha: &str) -> Result<CommitInfo>;

    /// Recursive listing of a tree.
    async fn get_tree(&self, owner: &str, repo: &str, tree_sha: &str) -> Result<Tree>;

    /// Compare `base...head`.
    async fn compare(&self, owner: &str, repo: &str, base: &str, head: &str) -> Result<Comparison>;

    /// Upload file content; returns the blob sha.
    async fn create_blob(&self, owner: &str, repo: &str, content: &[u8]) -> Result<String>;

    /// Create a tree on top of `base_tree`; returns the tree sha.
    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[NewTreeEntry],
    ) -> Result<String>;

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parents: &[String],
    ) -> Result<CommitInfo>;

    /// Create `refs/heads/{branch}`. Fails with 422 when it already exists.
    async fn create_branch(&self, owner: &str, repo: &str, branch: &str, sha: &str) -> Result<()>;

    /// Move `refs/heads/{branch}`. Without `force` only fast-forwards are accepted.
    async fn update_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<()>;

    /// The open pull request from `owner:head_branch` into `base`, if any.
    async fn find_open_pull(
        &self,
        owner: &str,
        repo: &str,
        head_branch: &str,
        base: &str,
    ) -> Result<Option<PullRequest>>;

    async fn create_pull(&self, owner: &str, repo: &str, pull: &NewPullRequest) -> Result<PullRequest>;
}
