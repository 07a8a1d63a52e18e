use std::sync::Arc;
use std::time::Duration;

use vocpub::{
    ApiRateLimiter, AppJwtSigner, GitHubClient, InstallationLocator, InstallationTokenProvider,
    PublishOptions, Publisher, ReqwestTransport,
};

use crate::config::Config;
use crate::progress::{self, ProgressReporter};

/// Build a GitHub client authenticated as the configured App installation.
pub(crate) fn build_client(config: &Config) -> Result<Arc<GitHubClient>, Box<dyn std::error::Error>> {
    let github = &config.github;
    let app_id = github
        .app_id
        .ok_or("GitHub App id not configured. Set github.app_id or GH_APP_ID")?;
    let private_key = github
        .private_key
        .as_deref()
        .ok_or("GitHub App private key not configured. Set github.private_key or GH_APP_PRIVATE_KEY")?;

    let locator = installation_locator(config)?;
    let signer = AppJwtSigner::from_pem(app_id.to_string(), private_key)?;

    let timeout = Duration::from_secs(config.publish.request_timeout_secs);
    let transport = Arc::new(ReqwestTransport::with_timeout(timeout)?);
    let retry = config.publish.retry.clone();

    let credentials = InstallationTokenProvider::new(
        transport.clone(),
        github.api_url.clone(),
        signer,
        locator,
    )
    .with_refresh_margin(chrono::Duration::seconds(
        config.publish.refresh_margin_secs,
    ))
    .with_retry(retry.clone());

    let limiter = ApiRateLimiter::new(config.publish.requests_per_second);

    Ok(Arc::new(GitHubClient::new(
        transport,
        github.api_url.clone(),
        Arc::new(credentials),
        limiter,
        retry,
    )))
}

fn installation_locator(config: &Config) -> Result<InstallationLocator, String> {
    if let Some(id) = config.github.installation_id {
        return Ok(InstallationLocator::Id(id));
    }
    if config.targets.owner.is_empty() {
        return Err(
            "Neither github.installation_id nor targets.owner is configured; cannot locate the App installation"
                .to_string(),
        );
    }
    Ok(InstallationLocator::Owner(config.targets.owner.clone()))
}

/// Build a publisher from configuration, reporting progress when a reporter is given.
pub(crate) fn build_publisher(
    config: &Config,
    reporter: Option<Arc<ProgressReporter>>,
) -> Result<Publisher, Box<dyn std::error::Error>> {
    if config.targets.owner.is_empty() {
        return Err("Target owner not configured. Set targets.owner or VOCPUB_TARGETS__OWNER".into());
    }

    let client = build_client(config)?;
    let options = PublishOptions {
        concurrency: config.publish.concurrency,
        branch_prefix: config.publish.branch_prefix.clone(),
        retry: config.publish.retry.clone(),
    };

    let mut publisher = Publisher::new(client, config.targets.clone())
        .with_options(options)
        .with_templates(config.templates.clone());
    if let Some(reporter) = reporter {
        publisher = publisher.with_progress(progress::callback(reporter));
    }
    Ok(publisher)
}
