//! HTTP implementation of [`GitHubApi`].

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::form_urlencoded::byte_serialize;

use super::GitHubApi;
use super::error::{GitHubError, Result, response_message, short_error_message};
use super::pagination::parse_link_header;
use super::types::{
    CommitInfo, Comparison, CompareResponse, GitCommitResponse, InstallationRepositoriesResponse,
    NewPullRequest, NewTreeEntry, PullRequest, PullResponse, RefResponse, RepositoryInfo,
    ShaResponse, Tree,
};
use crate::auth::{AuthError, InstallationTokenProvider};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::rate_limit::{ApiRateLimiter, RateLimitInfo};
use crate::retry::{RetryConfig, RetryError, with_retry};

/// Public GitHub REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const PER_PAGE: u32 = 100;

/// GitHub REST client authenticated as an App installation.
///
/// Every request waits on the shared [`ApiRateLimiter`], feeds the response's
/// rate limit headers back into it, and (except PR creation) retries transient
/// failures under the configured [`RetryConfig`].
#[derive(Clone)]
pub struct GitHubClient {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    credentials: Arc<InstallationTokenProvider>,
    limiter: ApiRateLimiter,
    retry: RetryConfig,
}

impl GitHubClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        api_url: impl Into<String>,
        credentials: Arc<InstallationTokenProvider>,
        limiter: ApiRateLimiter,
        retry: RetryConfig,
    ) -> Self {
        Self {
            transport,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            credentials,
            limiter,
            retry,
        }
    }

    pub fn rate_limiter(&self) -> &ApiRateLimiter {
        &self.limiter
    }

    /// One request: pace, authenticate, send, record quota.
    async fn attempt(&self, method: HttpMethod, path: &str, body: Option<&Value>) -> Result<HttpResponse> {
        self.limiter.acquire().await;
        let token = self.credentials.token().await?;

        let mut request = HttpRequest::new(method, format!("{}{}", self.api_url, path))
            .header("Authorization", format!("Bearer {}", token.expose()))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "vocpub");
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body).map_err(|e| GitHubError::Decode(e.to_string()))?;
            request = request
                .header("Content-Type", "application/json")
                .body(bytes);
        }

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| GitHubError::Transport(e.to_string()))?;

        if let Some(info) = RateLimitInfo::from_headers(&response.headers) {
            self.limiter.observe(&info);
        }
        Ok(response)
    }

    /// Send and classify the response.
    ///
    /// A 401 means the installation token was revoked or expired early: it is
    /// dropped and the request repeated once with a fresh one. A second 401 is
    /// an [`AuthError`], which aborts the run.
    async fn execute(&self, method: HttpMethod, path: &str, body: Option<&Value>) -> Result<HttpResponse> {
        let mut response = self.attempt(method, path, body).await?;
        if response.status == 401 {
            tracing::debug!(method = method.as_str(), path, "Installation token rejected, refreshing");
            self.credentials.invalidate();
            response = self.attempt(method, path, body).await?;
            if response.status == 401 {
                self.credentials.invalidate();
                return Err(AuthError::rejected(401, response_message(&response)).into());
            }
        }

        if response.is_success() {
            return Ok(response);
        }

        let err = GitHubError::from_response(&response);
        tracing::debug!(method = method.as_str(), path, status = response.status, "GitHub request failed");
        Err(err)
    }

    /// [`Self::execute`] under the retry policy.
    async fn send(&self, method: HttpMethod, path: &str, body: Option<&Value>) -> Result<HttpResponse> {
        let label = format!("{} {}", method.as_str(), path);
        with_retry(
            move || self.execute(method, path, body),
            &self.retry,
            GitHubError::is_transient,
            |e: &GitHubError| short_error_message(e),
            &label,
        )
        .await
        .map_err(|err| match err {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { attempts, last } => {
                tracing::warn!(operation = %label, attempts, "Giving up on GitHub request: {}", short_error_message(&last));
                GitHubError::ExhaustedRetries {
                    attempts,
                    last: last.to_string(),
                }
            }
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let response = self.send(method, path, body).await?;
        decode(&response)
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    response
        .json()
        .map_err(|e| GitHubError::Decode(e.to_string()))
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn list_installation_repositories(&self) -> Result<Vec<RepositoryInfo>> {
        let mut repositories = Vec::new();
        let mut page = 1;
        loop {
            let path = format!("/installation/repositories?per_page={PER_PAGE}&page={page}");
            let response = self.send(HttpMethod::Get, &path, None).await?;
            let body: InstallationRepositoriesResponse = decode(&response)?;
            tracing::trace!(page, total_count = body.total_count, "Fetched installation repositories page");
            repositories.extend(body.repositories.into_iter().map(RepositoryInfo::from));

            let next = response
                .header("link")
                .and_then(|h| parse_link_header(h).next_page);
            match next {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        tracing::debug!(count = repositories.len(), "Listed installation repositories");
        Ok(repositories)
    }

    async fn get_branch_head(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<String>> {
        let path = format!("/repos/{owner}/{repo}/git/ref/heads/{branch}");
        match self.request::<RefResponse>(HttpMethod::Get, &path, None).await {
            Ok(r) => Ok(Some(r.object.sha)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_commit(&self, owner: &str, repo: &str, sha: &str) -> Result<CommitInfo> {
        let path = format!("/repos/{owner}/{repo}/git/commits/{sha}");
        let commit: GitCommitResponse = self.request(HttpMethod::Get, &path, None).await?;
        Ok(commit.into())
    }

    async fn get_tree(&self, owner: &str, repo: &str, tree_sha: &str) -> Result<Tree> {
        let path = format!("/repos/{owner}/{repo}/git/trees/{tree_sha}?recursive=1");
        self.request(HttpMethod::Get, &path, None).await
    }

    async fn compare(&self, owner: &str, repo: &str, base: &str, head: &str) -> Result<Comparison> {
        let path = format!("/repos/{owner}/{repo}/compare/{base}...{head}");
        let cmp: CompareResponse = self.request(HttpMethod::Get, &path, None).await?;
        Ok(cmp.into())
    }

    async fn create_blob(&self, owner: &str, repo: &str, content: &[u8]) -> Result<String> {
        let path = format!("/repos/{owner}/{repo}/git/blobs");
        let body = json!({ "content": STANDARD.encode(content), "encoding": "base64" });
        let blob: ShaResponse = self.request(HttpMethod::Post, &path, Some(&body)).await?;
        Ok(blob.sha)
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[NewTreeEntry],
    ) -> Result<String> {
        let path = format!("/repos/{owner}/{repo}/git/trees");
        let body = json!({ "base_tree": base_tree, "tree": entries });
        let tree: ShaResponse = self.request(HttpMethod::Post, &path, Some(&body)).await?;
        Ok(tree.sha)
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parents: &[String],
    ) -> Result<CommitInfo> {
        let path = format!("/repos/{owner}/{repo}/git/commits");
        let body = json!({ "message": message, "tree": tree_sha, "parents": parents });
        let commit: GitCommitResponse = self.request(HttpMethod::Post, &path, Some(&body)).await?;
        Ok(commit.into())
    }

    async fn create_branch(&self, owner: &str, repo: &str, branch: &str, sha: &str) -> Result<()> {
        let path = format!("/repos/{owner}/{repo}/git/refs");
        let body = json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
        self.send(HttpMethod::Post, &path, Some(&body)).await?;
        Ok(())
    }

    async fn update_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<()> {
        let path = format!("/repos/{owner}/{repo}/git/refs/heads/{branch}");
        let body = json!({ "sha": sha, "force": force });
        self.send(HttpMethod::Patch, &path, Some(&body)).await?;
        Ok(())
    }

    async fn find_open_pull(
        &self,
        owner: &str,
        repo: &str,
        head_branch: &str,
        base: &str,
    ) -> Result<Option<PullRequest>> {
        let path = format!(
            "/repos/{owner}/{repo}/pulls?state=open&head={}&base={}",
            encode(&format!("{owner}:{head_branch}")),
            encode(base)
        );
        let pulls: Vec<PullResponse> = self.request(HttpMethod::Get, &path, None).await?;
        Ok(pulls.into_iter().next().map(PullRequest::from))
    }

    async fn create_pull(&self, owner: &str, repo: &str, pull: &NewPullRequest) -> Result<PullRequest> {
        // Not idempotent: a single attempt. The caller re-searches before trying again.
        let path = format!("/repos/{owner}/{repo}/pulls");
        let body = serde_json::to_value(pull).map_err(|e| GitHubError::Decode(e.to_string()))?;
        let response = self.execute(HttpMethod::Post, &path, Some(&body)).await?;
        let pr: PullResponse = decode(&response)?;
        Ok(pr.into())
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_url", &self.api_url)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}
