//! Progress events emitted while publishing.
//!
//! The orchestrator reports what it is doing through an optional callback so
//! the CLI can render it (log lines today) without the library knowing how.

use crate::publish::{PublishState, TargetOutcome};

/// Progress events emitted during a publish run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PublishProgress {
    /// A run is starting.
    RunStarted {
        /// Number of vocabularies in the run.
        targets: usize,
        /// Worker pool size.
        concurrency: usize,
    },

    /// A vocabulary resolved to its repository and is being reconciled.
    TargetStarted {
        vocabulary: String,
        repository: String,
    },

    /// A target moved to a new pipeline state.
    StateChanged {
        vocabulary: String,
        state: PublishState,
    },

    /// A commit was written and the publish branch moved to it.
    Committed {
        vocabulary: String,
        repository: String,
        branch: String,
        commit_sha: String,
        /// Added, modified and deleted paths.
        files_changed: usize,
    },

    /// A pull request was found or opened for the publish branch.
    PullRequestOpened {
        vocabulary: String,
        repository: String,
        number: u64,
        url: String,
        /// False when an existing open pull request was reused.
        created: bool,
    },

    /// Someone moved a branch under us; the target is retried from diffing.
    ConflictRetry {
        vocabulary: String,
        repository: String,
    },

    /// A target reached a terminal state.
    TargetFinished {
        vocabulary: String,
        outcome: TargetOutcome,
    },

    /// Warning message (non-fatal).
    Warning {
        message: String,
    },

    /// The run is complete.
    RunComplete {
        published: usize,
        unchanged: usize,
        failed: usize,
    },
}

/// Callback type for progress reporting.
pub type ProgressCallback = Box<dyn Fn(PublishProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: PublishProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}
