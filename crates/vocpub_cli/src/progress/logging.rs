use vocpub::{PublishProgress, TargetOutcome};

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: PublishProgress) {
        match event {
            PublishProgress::RunStarted {
                targets,
                concurrency,
            } => {
                tracing::info!(targets, concurrency, "Publishing vocabularies");
            }

            PublishProgress::TargetStarted {
                vocabulary,
                repository,
            } => {
                tracing::info!(vocabulary = %vocabulary, repo = %repository, "Reconciling");
            }

            PublishProgress::StateChanged { vocabulary, state } => {
                tracing::debug!(vocabulary = %vocabulary, state = %state, "State changed");
            }

            PublishProgress::Committed {
                vocabulary,
                repository,
                branch,
                commit_sha,
                files_changed,
            } => {
                tracing::info!(
                    vocabulary = %vocabulary,
                    repo = %repository,
                    branch = %branch,
                    commit = %commit_sha,
                    files_changed,
                    "Committed"
                );
            }

            PublishProgress::PullRequestOpened {
                vocabulary,
                repository,
                number,
                url,
                created,
            } => {
                if created {
                    tracing::info!(vocabulary = %vocabulary, repo = %repository, number, url = %url, "Opened pull request");
                } else {
                    tracing::info!(vocabulary = %vocabulary, repo = %repository, number, url = %url, "Pull request already open");
                }
            }

            PublishProgress::ConflictRetry {
                vocabulary,
                repository,
            } => {
                tracing::warn!(vocabulary = %vocabulary, repo = %repository, "Branch moved concurrently, retrying");
            }

            PublishProgress::TargetFinished {
                vocabulary,
                outcome,
            } => match outcome {
                TargetOutcome::Published { pr_number, url, .. } => {
                    tracing::info!(vocabulary = %vocabulary, pr = pr_number, url = %url, "Published");
                }
                TargetOutcome::NoChange => {
                    tracing::info!(vocabulary = %vocabulary, "No change");
                }
                TargetOutcome::Failed { reason, message } => {
                    tracing::error!(vocabulary = %vocabulary, reason = %reason, error = %message, "Failed");
                }
            },

            PublishProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            PublishProgress::RunComplete {
                published,
                unchanged,
                failed,
            } => {
                tracing::info!(published, unchanged, failed, "Publish complete");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
