//! Reconciliation of a single (vocabulary, repository) target.

use std::collections::HashMap;

use backon::BackoffBuilder;
use chrono::{DateTime, Utc};

use crate::changeset::{ChangeSet, build_change_set, diff_tree, fetch_snapshot};
use crate::export::VocabularyExport;
use crate::github::{GitHubApi, GitHubError, NewPullRequest, NewTreeEntry, PullRequest, short_error_message};
use crate::progress::{ProgressCallback, PublishProgress, emit};
use crate::retry::RetryConfig;
use crate::targets::TargetRepository;
use crate::templates::{PublishTemplates, TemplateContext};

use super::branch::{BranchState, inspect_branch};
use super::{PublishError, PublishState, TargetOutcome};

/// Everything one target needs, borrowed from the run.
pub(crate) struct TargetContext<'a> {
    pub api: &'a dyn GitHubApi,
    pub target: &'a TargetRepository,
    pub export: &'a VocabularyExport,
    pub branch: &'a str,
    pub templates: &'a PublishTemplates,
    pub retry: &'a RetryConfig,
    pub now: DateTime<Utc>,
    pub on_progress: Option<&'a ProgressCallback>,
}

enum Attempt {
    Finished(TargetOutcome),
    /// A branch moved under us between reading and writing.
    Conflict,
}

impl TargetContext<'_> {
    fn vocabulary(&self) -> &str {
        self.export.vocabulary_id()
    }

    fn templates_context(&self) -> TemplateContext<'_> {
        TemplateContext {
            vocabulary: self.vocabulary(),
            branch: self.branch,
            now: self.now,
        }
    }

    fn enter(&self, state: PublishState) {
        tracing::debug!(vocabulary = %self.vocabulary(), repo = %self.target, %state, "State changed");
        emit(
            self.on_progress,
            PublishProgress::StateChanged {
                vocabulary: self.vocabulary().to_string(),
                state,
            },
        );
    }
}

/// Drive one target from diffing to a terminal outcome.
///
/// A concurrent branch move restarts from diffing once; a second one is
/// [`PublishError::ConcurrentUpdate`].
pub(crate) async fn reconcile(ctx: &TargetContext<'_>) -> Result<TargetOutcome, PublishError> {
    for attempt in 0..=1 {
        match attempt_once(ctx).await? {
            Attempt::Finished(outcome) => return Ok(outcome),
            Attempt::Conflict if attempt == 0 => {
                tracing::warn!(
                    vocabulary = %ctx.vocabulary(),
                    repo = %ctx.target,
                    branch = ctx.branch,
                    "Branch moved concurrently, retrying from diff"
                );
                emit(
                    ctx.on_progress,
                    PublishProgress::ConflictRetry {
                        vocabulary: ctx.vocabulary().to_string(),
                        repository: ctx.target.full_name(),
                    },
                );
            }
            Attempt::Conflict => {}
        }
    }

    Err(PublishError::ConcurrentUpdate {
        branch: ctx.branch.to_string(),
    })
}

async fn attempt_once(ctx: &TargetContext<'_>) -> Result<Attempt, PublishError> {
    let api = ctx.api;
    let target = ctx.target;

    ctx.enter(PublishState::Diffing);
    let change_set = build_change_set(api, ctx.export, target).await?;
    if change_set.is_empty() {
        tracing::info!(vocabulary = %ctx.vocabulary(), repo = %target, "Default branch already up to date");
        return Ok(Attempt::Finished(TargetOutcome::NoChange));
    }

    ctx.enter(PublishState::Committing);
    let branch_state = inspect_branch(
        api,
        target,
        ctx.branch,
        &change_set.base_commit_sha,
        ctx.vocabulary(),
    )
    .await?;

    if let BranchState::Ahead { head } = &branch_state {
        let snapshot = fetch_snapshot(api, target, head).await?;
        if diff_tree(ctx.export, &snapshot.blobs, &target.path_prefix).is_empty() {
            tracing::info!(
                vocabulary = %ctx.vocabulary(),
                repo = %target,
                branch = ctx.branch,
                "Publish branch already holds this export"
            );
            let (pull, created) = open_pull(ctx).await?;
            return Ok(Attempt::Finished(if created {
                published(pull, true)
            } else {
                TargetOutcome::NoChange
            }));
        }
    }

    let commit_sha = write_commit(ctx, &change_set).await?;

    // The change set is only valid on the base it was computed against.
    let default_head = api
        .get_branch_head(&target.owner, &target.name, &target.default_branch)
        .await?;
    let branch_head = api.get_branch_head(&target.owner, &target.name, ctx.branch).await?;
    if default_head.as_deref() != Some(change_set.base_commit_sha.as_str())
        || branch_head.as_deref() != branch_state.head()
    {
        return Ok(Attempt::Conflict);
    }

    let moved = match &branch_state {
        BranchState::Missing => {
            api.create_branch(&target.owner, &target.name, ctx.branch, &commit_sha)
                .await
        }
        BranchState::Behind { .. } => {
            api.update_branch(&target.owner, &target.name, ctx.branch, &commit_sha, false)
                .await
        }
        BranchState::Ahead { .. } | BranchState::Stale { .. } => {
            api.update_branch(&target.owner, &target.name, ctx.branch, &commit_sha, true)
                .await
        }
    };
    match moved {
        Ok(()) => {}
        Err(e) if e.is_unprocessable() => {
            tracing::debug!(branch = ctx.branch, error = %e, "Ref update rejected");
            return Ok(Attempt::Conflict);
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        vocabulary = %ctx.vocabulary(),
        repo = %target,
        branch = ctx.branch,
        commit = %commit_sha,
        files = change_set.len(),
        "Moved publish branch"
    );
    emit(
        ctx.on_progress,
        PublishProgress::Committed {
            vocabulary: ctx.vocabulary().to_string(),
            repository: target.full_name(),
            branch: ctx.branch.to_string(),
            commit_sha,
            files_changed: change_set.len(),
        },
    );

    let (pull, created) = open_pull(ctx).await?;
    Ok(Attempt::Finished(published(pull, created)))
}

fn published(pull: PullRequest, created: bool) -> TargetOutcome {
    TargetOutcome::Published {
        pr_number: pull.number,
        url: pull.url,
        created,
    }
}

/// Write blobs, a tree on the base tree and a commit on the base commit.
async fn write_commit(ctx: &TargetContext<'_>, change_set: &ChangeSet) -> Result<String, PublishError> {
    let target = ctx.target;
    let contents: HashMap<String, &[u8]> = ctx
        .export
        .files()
        .iter()
        .map(|f| (format!("{}{}", target.path_prefix, f.path()), f.content()))
        .collect();

    let mut entries = Vec::with_capacity(change_set.len());
    for path in change_set.upserts() {
        let content = contents.get(path).copied().unwrap_or_default();
        let sha = ctx.api.create_blob(&target.owner, &target.name, content).await?;
        entries.push(NewTreeEntry::upsert(path, sha));
    }
    entries.extend(change_set.deletions.iter().map(NewTreeEntry::delete));

    let tree_sha = ctx
        .api
        .create_tree(&target.owner, &target.name, &change_set.base_tree_sha, &entries)
        .await?;

    let message = ctx.templates.commit_message(&ctx.templates_context());
    let commit = ctx
        .api
        .create_commit(
            &target.owner,
            &target.name,
            &message,
            &tree_sha,
            std::slice::from_ref(&change_set.base_commit_sha),
        )
        .await?;

    Ok(commit.sha)
}

/// Find the open pull request for the publish branch, or open one.
///
/// Creation is not idempotent, so every attempt is preceded by a search and a
/// rejected creation is answered by searching again.
async fn open_pull(ctx: &TargetContext<'_>) -> Result<(PullRequest, bool), PublishError> {
    let target = ctx.target;
    ctx.enter(PublishState::OpeningPr);

    let mut backoff = ctx.retry.clone().into_backoff().build();
    let mut attempts = 0u32;

    let (pull, created) = loop {
        if let Some(existing) = ctx
            .api
            .find_open_pull(&target.owner, &target.name, ctx.branch, &target.default_branch)
            .await?
        {
            break (existing, false);
        }

        let request = NewPullRequest {
            title: ctx.templates.pr_title(&ctx.templates_context()),
            body: ctx.templates.pr_body(&ctx.templates_context()),
            head: ctx.branch.to_string(),
            base: target.default_branch.clone(),
        };
        attempts += 1;
        match ctx.api.create_pull(&target.owner, &target.name, &request).await {
            Ok(pull) => break (pull, true),
            Err(e) if e.is_unprocessable() => {
                match ctx
                    .api
                    .find_open_pull(&target.owner, &target.name, ctx.branch, &target.default_branch)
                    .await?
                {
                    Some(existing) => break (existing, false),
                    None => return Err(e.into()),
                }
            }
            Err(e) if e.is_transient() => match backoff.next() {
                Some(delay) => {
                    tracing::warn!(
                        repo = %target,
                        branch = ctx.branch,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %short_error_message(&e),
                        "Pull request creation failed, searching again before retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(GitHubError::ExhaustedRetries {
                        attempts,
                        last: short_error_message(&e),
                    }
                    .into());
                }
            },
            Err(e) => return Err(e.into()),
        }
    };

    tracing::info!(
        vocabulary = %ctx.vocabulary(),
        repo = %target,
        number = pull.number,
        created,
        "Pull request ready"
    );
    emit(
        ctx.on_progress,
        PublishProgress::PullRequestOpened {
            vocabulary: ctx.vocabulary().to_string(),
            repository: target.full_name(),
            number: pull.number,
            url: pull.url.clone(),
            created,
        },
    );

    Ok((pull, created))
}
