//! Publishing exports as commits and pull requests.
//!
//! Each (vocabulary, repository) target goes through
//! `Resolving → Diffing → Committing → OpeningPr → Done`, ending early in
//! `NoChange` or `Failed`. Targets run concurrently on a bounded worker pool
//! and fail independently; only an authentication failure aborts the run.

mod branch;
mod orchestrator;
mod pipeline;
mod state;

use thiserror::Error;

use crate::auth::AuthError;
use crate::changeset::FetchError;
use crate::github::GitHubError;
use crate::targets::ResolveError;

pub use branch::{BranchState, DEFAULT_BRANCH_PREFIX, inspect_branch, publish_branch_name};
pub use orchestrator::{DEFAULT_CONCURRENCY, PublishOptions, Publisher, RunControl, RunError};
pub use state::{FailureReason, PublishState, TargetOutcome, TargetResult};

/// Why a single target failed.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Unresolved(#[from] ResolveError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error("branch '{branch}' has {} commit(s) not written by the pipeline", commits.len())]
    Diverged { branch: String, commits: Vec<String> },

    #[error("branch '{branch}' kept moving while publishing")]
    ConcurrentUpdate { branch: String },

    #[error("vocabulary '{0}' appears more than once in this run")]
    DuplicateVocabulary(String),

    #[error("publish task failed: {0}")]
    Task(String),

    #[error("run cancelled")]
    Cancelled,
}

impl PublishError {
    pub fn reason(&self) -> FailureReason {
        if self.as_auth().is_some() {
            return FailureReason::AuthError;
        }
        match self {
            Self::Unresolved(_) => FailureReason::UnresolvedTarget,
            Self::Fetch(_) => FailureReason::FetchError,
            Self::GitHub(GitHubError::ExhaustedRetries { .. }) => FailureReason::ExhaustedRetries,
            Self::GitHub(_) | Self::DuplicateVocabulary(_) | Self::Task(_) => {
                FailureReason::PermanentError
            }
            Self::Diverged { .. } => FailureReason::DivergedBranch,
            Self::ConcurrentUpdate { .. } => FailureReason::ConcurrentUpdate,
            Self::Cancelled => FailureReason::Cancelled,
        }
    }

    /// The authentication failure behind this error, if any.
    pub fn as_auth(&self) -> Option<&AuthError> {
        match self {
            Self::GitHub(GitHubError::Auth(e)) | Self::Fetch(FetchError::GitHub(GitHubError::Auth(e))) => {
                Some(e)
            }
            _ => None,
        }
    }

    pub fn into_auth(self) -> Result<AuthError, Self> {
        match self {
            Self::GitHub(GitHubError::Auth(e)) | Self::Fetch(FetchError::GitHub(GitHubError::Auth(e))) => {
                Ok(e)
            }
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_reason_codes() {
        let cases = [
            (
                PublishError::Unresolved(ResolveError::NotMapped("x".into())),
                FailureReason::UnresolvedTarget,
            ),
            (
                PublishError::Fetch(FetchError::BranchNotFound {
                    repository: "o/r".into(),
                    branch: "main".into(),
                }),
                FailureReason::FetchError,
            ),
            (
                PublishError::GitHub(GitHubError::ExhaustedRetries {
                    attempts: 6,
                    last: "503".into(),
                }),
                FailureReason::ExhaustedRetries,
            ),
            (
                PublishError::GitHub(GitHubError::Forbidden {
                    status: 403,
                    message: "Resource not accessible by integration".into(),
                }),
                FailureReason::PermanentError,
            ),
            (
                PublishError::Fetch(FetchError::GitHub(GitHubError::Auth(AuthError::unavailable("down")))),
                FailureReason::AuthError,
            ),
            (PublishError::Cancelled, FailureReason::Cancelled),
        ];
        for (err, reason) in cases {
            assert_eq!(err.reason(), reason, "{err}");
        }
    }

    #[test]
    fn extracts_nested_auth_error() {
        let err = PublishError::GitHub(GitHubError::Auth(AuthError::InstallationNotFound("lexicons".into())));
        assert!(matches!(err.into_auth(), Ok(AuthError::InstallationNotFound(_))));
        assert!(PublishError::Cancelled.into_auth().is_err());
    }
}
