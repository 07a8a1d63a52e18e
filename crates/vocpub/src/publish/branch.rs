//! The publish branch: naming and ownership checks.

use crate::github::{CompareStatus, GitHubApi};
use crate::targets::TargetRepository;
use crate::templates::has_pipeline_trailer;

use super::PublishError;

/// Default prefix for publish branches.
pub const DEFAULT_BRANCH_PREFIX: &str = "publish/";

/// Branch a vocabulary is published on. Depends only on the id.
pub fn publish_branch_name(prefix: &str, vocabulary_id: &str) -> String {
    format!("{prefix}{vocabulary_id}")
}

/// What the publish branch looks like relative to the default branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchState {
    Missing,
    /// No commits of its own; a fast-forward is enough.
    Behind { head: String },
    /// Pipeline commits on top of the current default branch.
    Ahead { head: String },
    /// Pipeline commits on an older default branch; rebuilt and force-moved.
    Stale { head: String },
}

impl BranchState {
    pub fn head(&self) -> Option<&str> {
        match self {
            Self::Missing => None,
            Self::Behind { head } | Self::Ahead { head } | Self::Stale { head } => Some(head),
        }
    }
}

/// Inspect the publish branch against `base_sha`.
///
/// Fails with [`PublishError::Diverged`] when the branch carries a commit
/// without this vocabulary's pipeline trailer. Nothing is written.
pub async fn inspect_branch(
    api: &dyn GitHubApi,
    target: &TargetRepository,
    branch: &str,
    base_sha: &str,
    vocabulary_id: &str,
) -> Result<BranchState, PublishError> {
    let Some(head) = api.get_branch_head(&target.owner, &target.name, branch).await? else {
        return Ok(BranchState::Missing);
    };

    let comparison = api.compare(&target.owner, &target.name, base_sha, &head).await?;

    let foreign: Vec<String> = comparison
        .commits
        .iter()
        .filter(|c| !has_pipeline_trailer(&c.message, vocabulary_id))
        .map(|c| c.sha.clone())
        .collect();
    if !foreign.is_empty() {
        return Err(PublishError::Diverged {
            branch: branch.to_string(),
            commits: foreign,
        });
    }

    let state = match comparison.status {
        CompareStatus::Identical | CompareStatus::Behind => BranchState::Behind { head },
        CompareStatus::Ahead => BranchState::Ahead { head },
        CompareStatus::Diverged => BranchState::Stale { head },
    };

    tracing::debug!(
        repo = %target,
        branch,
        ahead_by = comparison.ahead_by,
        behind_by = comparison.behind_by,
        state = ?state,
        "Inspected publish branch"
    );

    Ok(state)
}
