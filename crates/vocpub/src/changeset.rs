//! Computing the minimal change that brings a repository in line with an export.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::export::VocabularyExport;
use crate::github::{GitHubApi, GitHubError, Tree};
use crate::targets::TargetRepository;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("branch '{branch}' not found in {repository}")]
    BranchNotFound { repository: String, branch: String },

    /// Deletions cannot be computed from a partial listing.
    #[error("tree {tree_sha} of {repository} is too large to list recursively")]
    TruncatedTree { repository: String, tree_sha: String },

    #[error(transparent)]
    GitHub(#[from] GitHubError),
}

/// Path-level difference between an export and a tree. Paths include the prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub additions: Vec<String>,
    pub modifications: Vec<String>,
    pub deletions: Vec<String>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.modifications.is_empty() && self.deletions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.additions.len() + self.modifications.len() + self.deletions.len()
    }
}

/// Diff an export against the regular blobs of a tree (`path -> blob sha`).
///
/// Files are compared by blob id only; only paths under `prefix` can be deleted.
pub fn diff_tree(export: &VocabularyExport, blobs: &BTreeMap<String, String>, prefix: &str) -> TreeDiff {
    let mut diff = TreeDiff::default();
    let mut exported = BTreeSet::new();

    for file in export.files() {
        let path = format!("{prefix}{}", file.path());
        match blobs.get(&path) {
            None => diff.additions.push(path.clone()),
            Some(sha) if sha != file.content_hash() => diff.modifications.push(path.clone()),
            Some(_) => {}
        }
        exported.insert(path);
    }

    diff.deletions = blobs
        .keys()
        .filter(|path| path.starts_with(prefix) && !exported.contains(*path))
        .cloned()
        .collect();

    diff
}

/// Regular blob entries of a recursive tree. Submodules and symlinks are skipped.
pub fn regular_blobs(tree: &Tree) -> BTreeMap<String, String> {
    tree.entries
        .iter()
        .filter(|e| e.is_regular_blob())
        .map(|e| (e.path.clone(), e.sha.clone()))
        .collect()
}

/// A commit's tree, flattened to its regular blobs.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    pub commit_sha: String,
    pub tree_sha: String,
    pub blobs: BTreeMap<String, String>,
}

pub async fn fetch_snapshot(
    api: &dyn GitHubApi,
    target: &TargetRepository,
    commit_sha: &str,
) -> Result<TreeSnapshot, FetchError> {
    let commit = api.get_commit(&target.owner, &target.name, commit_sha).await?;
    let tree = api.get_tree(&target.owner, &target.name, &commit.tree_sha).await?;
    if tree.truncated {
        return Err(FetchError::TruncatedTree {
            repository: target.full_name(),
            tree_sha: tree.sha,
        });
    }

    Ok(TreeSnapshot {
        commit_sha: commit.sha,
        tree_sha: commit.tree_sha,
        blobs: regular_blobs(&tree),
    })
}

/// What has to change in one target repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub target: TargetRepository,
    pub additions: Vec<String>,
    pub modifications: Vec<String>,
    pub deletions: Vec<String>,
    /// Default-branch commit the change set was computed against.
    pub base_commit_sha: String,
    pub base_tree_sha: String,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.modifications.is_empty() && self.deletions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.additions.len() + self.modifications.len() + self.deletions.len()
    }

    /// Paths whose content has to be written.
    pub fn upserts(&self) -> impl Iterator<Item = &str> {
        self.additions
            .iter()
            .chain(self.modifications.iter())
            .map(String::as_str)
    }
}

/// Compute the change set of `export` against the default branch of `target`.
pub async fn build_change_set(
    api: &dyn GitHubApi,
    export: &VocabularyExport,
    target: &TargetRepository,
) -> Result<ChangeSet, FetchError> {
    let head = api
        .get_branch_head(&target.owner, &target.name, &target.default_branch)
        .await?
        .ok_or_else(|| FetchError::BranchNotFound {
            repository: target.full_name(),
            branch: target.default_branch.clone(),
        })?;

    let snapshot = fetch_snapshot(api, target, &head).await?;
    let diff = diff_tree(export, &snapshot.blobs, &target.path_prefix);

    tracing::debug!(
        vocabulary = %export.vocabulary_id(),
        repo = %target,
        base = %snapshot.commit_sha,
        additions = diff.additions.len(),
        modifications = diff.modifications.len(),
        deletions = diff.deletions.len(),
        "Computed change set"
    );

    Ok(ChangeSet {
        target: target.clone(),
        additions: diff.additions,
        modifications: diff.modifications,
        deletions: diff.deletions,
        base_commit_sha: snapshot.commit_sha,
        base_tree_sha: snapshot.tree_sha,
    })
}
