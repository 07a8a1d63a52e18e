//! Vocpub - publishes VocBench vocabulary exports to GitHub.
//!
//! A GitHub App installation token is used to reconcile each vocabulary's
//! export against its lexicon repository: the minimal change is committed to
//! a per-vocabulary publish branch and offered as a pull request for review.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vocpub::{Publisher, RunControl, TargetConvention, VocabularyExport};
//!
//! let publisher = Publisher::new(Arc::new(client), TargetConvention::for_owner("lexicons"));
//! let export = VocabularyExport::from_path("skos", "exports/skos.rdf".as_ref())?;
//! let outcome = publisher.run(vec![export], &RunControl::new()).await?;
//! println!("{} published", outcome.counts().published);
//! ```

pub mod auth;
pub mod changeset;
pub mod clock;
pub mod export;
pub mod github;
pub mod http;
pub mod progress;
pub mod publish;
pub mod rate_limit;
pub mod report;
pub mod retry;
pub mod targets;
pub mod templates;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AppJwtSigner, AuthError, InstallationLocator, InstallationTokenProvider};
pub use changeset::{ChangeSet, FetchError, build_change_set};
pub use clock::{Clock, SystemClock};
pub use export::{ExportError, ExportFile, VocabularyExport};
pub use github::{DEFAULT_API_URL, GitHubApi, GitHubClient, GitHubError};
pub use http::HttpTransport;
pub use http::reqwest_transport::ReqwestTransport;
pub use progress::{ProgressCallback, PublishProgress};
pub use publish::{
    FailureReason, PublishError, PublishOptions, PublishState, Publisher, RunControl, RunError,
    TargetOutcome,
};
pub use rate_limit::ApiRateLimiter;
pub use report::{OutcomeCounts, RunOutcome, TargetReport, report};
pub use retry::RetryConfig;
pub use targets::{ResolveError, TargetConvention, TargetRepository, TargetResolver};
pub use templates::PublishTemplates;
