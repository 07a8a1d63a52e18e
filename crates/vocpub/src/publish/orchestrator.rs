use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;

use crate::auth::AuthError;
use crate::changeset::FetchError;
use crate::clock::{Clock, SystemClock};
use crate::export::VocabularyExport;
use crate::github::{GitHubApi, GitHubError, short_error_message};
use crate::progress::{ProgressCallback, PublishProgress, emit};
use crate::report::{RunOutcome, report};
use crate::retry::RetryConfig;
use crate::targets::{ResolveError, TargetConvention, TargetRepository, TargetResolver};
use crate::templates::PublishTemplates;

use super::branch::{DEFAULT_BRANCH_PREFIX, publish_branch_name};
use super::pipeline::{TargetContext, reconcile};
use super::{FailureReason, PublishError, TargetOutcome, TargetResult};

/// Default number of targets reconciled at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("authentication failed: {0}")]
    Auth(#[source] AuthError),
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Maximum targets in flight.
    pub concurrency: usize,
    pub branch_prefix: String,
    /// Backoff for pull request creation, which the client does not retry.
    pub retry: RetryConfig,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

struct ControlState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation for a run: an explicit flag, an optional deadline and an
/// optional parent whose cancellation propagates down.
#[derive(Clone)]
pub struct RunControl {
    state: Arc<ControlState>,
    deadline: Option<Instant>,
    parent: Option<Box<RunControl>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ControlState {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
            deadline: None,
            parent: None,
        }
    }

    /// Cancel automatically once `timeout` has elapsed.
    #[must_use]
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// A control cancelled with this one, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            parent: Some(Box::new(self.clone())),
            deadline: self.deadline,
            ..Self::new()
        }
    }

    /// Resolves once the control is cancelled.
    pub fn cancelled(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let own = async {
                loop {
                    let notified = self.state.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    if self.state.cancelled.load(Ordering::SeqCst) {
                        return;
                    }
                    notified.await;
                }
            };
            let deadline = async {
                match self.deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            let parent = async {
                match &self.parent {
                    Some(parent) => parent.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                () = own => {}
                () = deadline => {}
                () = parent => {}
            }
        })
    }
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Publishes vocabulary exports to their target repositories.
pub struct Publisher {
    api: Arc<dyn GitHubApi>,
    convention: TargetConvention,
    options: PublishOptions,
    templates: PublishTemplates,
    clock: Arc<dyn Clock>,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl Publisher {
    pub fn new(api: Arc<dyn GitHubApi>, convention: TargetConvention) -> Self {
        Self {
            api,
            convention,
            options: PublishOptions::default(),
            templates: PublishTemplates::default(),
            clock: Arc::new(SystemClock),
            on_progress: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: PublishOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_templates(mut self, templates: PublishTemplates) -> Self {
        self.templates = templates;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    /// Resolve vocabularies without publishing anything.
    pub async fn resolve(
        &self,
        vocabulary_ids: &[String],
    ) -> Result<BTreeMap<String, Result<TargetRepository, ResolveError>>, GitHubError> {
        let resolver = TargetResolver::load(&*self.api, self.convention.clone()).await?;
        Ok(resolver.resolve_targets(vocabulary_ids.iter().map(String::as_str)))
    }

    /// Publish every export and report per-target outcomes.
    ///
    /// Target failures end up in the outcome. Only an authentication failure
    /// aborts the run: targets in flight are cancelled and the error returned.
    pub async fn run(
        &self,
        exports: Vec<VocabularyExport>,
        control: &RunControl,
    ) -> Result<RunOutcome, RunError> {
        let on_progress = self.on_progress.as_deref();
        let concurrency = self.options.concurrency.clamp(1, exports.len().max(1));
        emit(
            on_progress,
            PublishProgress::RunStarted {
                targets: exports.len(),
                concurrency,
            },
        );

        let mut results = Vec::with_capacity(exports.len());

        let resolver = match TargetResolver::load(&*self.api, self.convention.clone()).await {
            Ok(resolver) => resolver,
            Err(GitHubError::Auth(e)) => return Err(RunError::Auth(e)),
            Err(e) => {
                let err = PublishError::Fetch(FetchError::GitHub(e));
                tracing::error!(error = %err, "Could not list installation repositories");
                for export in &exports {
                    results.push(self.finish(export.vocabulary_id(), None, Err(&err)));
                }
                return Ok(self.complete(results));
            }
        };

        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        for export in &exports {
            *occurrences.entry(export.vocabulary_id()).or_default() += 1;
        }

        let child = control.child();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let auth_failure: Arc<Mutex<Option<AuthError>>> = Arc::new(Mutex::new(None));
        let now = self.clock.now();
        let mut handles = Vec::with_capacity(exports.len());

        for export in &exports {
            let vocabulary = export.vocabulary_id().to_string();

            if occurrences.get(vocabulary.as_str()).copied().unwrap_or(0) > 1 {
                let err = PublishError::DuplicateVocabulary(vocabulary.clone());
                results.push(self.finish(&vocabulary, None, Err(&err)));
                continue;
            }

            let target = match resolver.resolve(&vocabulary) {
                Ok(target) => target,
                Err(e) => {
                    tracing::warn!(vocabulary = %vocabulary, error = %e, "Unresolved target");
                    results.push(self.finish(&vocabulary, None, Err(&PublishError::Unresolved(e))));
                    continue;
                }
            };

            let repository = target.full_name();
            let branch = publish_branch_name(&self.options.branch_prefix, &vocabulary);
            let api = Arc::clone(&self.api);
            let export = export.clone();
            let templates = self.templates.clone();
            let retry = self.options.retry.clone();
            let on_progress = self.on_progress.clone();
            let semaphore = Arc::clone(&semaphore);
            let child = child.clone();
            let auth_failure = Arc::clone(&auth_failure);

            let handle = tokio::spawn(async move {
                let on_progress = on_progress.as_deref();

                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return Err(PublishError::Cancelled),
                    },
                    () = child.cancelled() => return Err(PublishError::Cancelled),
                };
                if child.is_cancelled() {
                    return Err(PublishError::Cancelled);
                }

                emit(
                    on_progress,
                    PublishProgress::TargetStarted {
                        vocabulary: export.vocabulary_id().to_string(),
                        repository: target.full_name(),
                    },
                );

                let ctx = TargetContext {
                    api: &*api,
                    target: &target,
                    export: &export,
                    branch: &branch,
                    templates: &templates,
                    retry: &retry,
                    now,
                    on_progress,
                };

                let result = tokio::select! {
                    result = reconcile(&ctx) => result,
                    () = child.cancelled() => Err(PublishError::Cancelled),
                };

                match result {
                    Err(e) if e.as_auth().is_some() => {
                        // Stop everything else; the first auth failure is what the run reports.
                        child.cancel();
                        let outcome = TargetOutcome::failed(FailureReason::AuthError, short_error_message(&e));
                        if let Ok(auth) = e.into_auth()
                            && let Ok(mut slot) = auth_failure.lock()
                            && slot.is_none()
                        {
                            *slot = Some(auth);
                        }
                        Ok(outcome)
                    }
                    other => other,
                }
            });

            handles.push((vocabulary, repository, handle));
        }

        for (vocabulary, repository, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(vocabulary = %vocabulary, error = %e, "Publish task panicked");
                    Err(PublishError::Task(e.to_string()))
                }
            };
            results.push(self.finish(&vocabulary, Some(repository), result.as_ref().cloned()));
        }

        let auth = auth_failure.lock().ok().and_then(|mut slot| slot.take());
        if let Some(e) = auth {
            tracing::error!(error = %e, "Authentication failed, run aborted");
            return Err(RunError::Auth(e));
        }

        Ok(self.complete(results))
    }

    fn finish(
        &self,
        vocabulary: &str,
        repository: Option<String>,
        result: Result<TargetOutcome, &PublishError>,
    ) -> TargetResult {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => TargetOutcome::failed(e.reason(), short_error_message(e)),
        };

        match &outcome {
            TargetOutcome::Failed { reason, message } => tracing::warn!(
                vocabulary,
                repo = repository.as_deref().unwrap_or("-"),
                %reason,
                %message,
                "Target failed"
            ),
            _ => tracing::info!(
                vocabulary,
                repo = repository.as_deref().unwrap_or("-"),
                state = %outcome.state(),
                "Target finished"
            ),
        }
        emit(
            self.on_progress.as_deref(),
            PublishProgress::TargetFinished {
                vocabulary: vocabulary.to_string(),
                outcome: outcome.clone(),
            },
        );

        TargetResult {
            vocabulary: vocabulary.to_string(),
            repository,
            outcome,
        }
    }

    fn complete(&self, results: Vec<TargetResult>) -> RunOutcome {
        let outcome = report(results);
        let counts = outcome.counts();
        tracing::info!(
            published = counts.published,
            unchanged = counts.unchanged,
            failed = counts.failed,
            "Publish run complete"
        );
        emit(
            self.on_progress.as_deref(),
            PublishProgress::RunComplete {
                published: counts.published,
                unchanged: counts.unchanged,
                failed: counts.failed,
            },
        );
        outcome
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("convention", &self.convention)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
