use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{AppJwtSigner, AuthError, InstallationCredential, InstallationToken, Result};
use crate::clock::{Clock, SystemClock};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::retry::{RetryConfig, RetryError, with_retry};

/// Refresh this long before the token actually expires.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 60;

/// How to find the App installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallationLocator {
    /// A known installation id.
    Id(u64),
    /// Look up the installation on this organization (or user) account.
    Owner(String),
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct InstallationResponse {
    id: u64,
}

/// Hands out installation tokens, refreshing them before expiry.
///
/// Reads go through a `RwLock` fast path. A refresh holds an async mutex, so
/// concurrent callers that find the token stale queue up behind a single
/// exchange and then reuse its result.
pub struct InstallationTokenProvider {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    signer: AppJwtSigner,
    locator: InstallationLocator,
    clock: Arc<dyn Clock>,
    margin: Duration,
    retry: RetryConfig,
    cached: RwLock<Option<InstallationCredential>>,
    /// Guards the refresh path; holds the resolved installation id.
    refresh: Mutex<Option<u64>>,
}

impl InstallationTokenProvider {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        api_url: impl Into<String>,
        signer: AppJwtSigner,
        locator: InstallationLocator,
    ) -> Self {
        let resolved = match locator {
            InstallationLocator::Id(id) => Some(id),
            InstallationLocator::Owner(_) => None,
        };
        Self {
            transport,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            signer,
            locator,
            clock: Arc::new(SystemClock),
            margin: Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
            retry: RetryConfig::default(),
            cached: RwLock::new(None),
            refresh: Mutex::new(resolved),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// A token valid for at least the refresh margin.
    pub async fn token(&self) -> Result<InstallationToken> {
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let mut installation = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let installation_id = match *installation {
            Some(id) => id,
            None => {
                let id = self.discover_installation().await?;
                *installation = Some(id);
                id
            }
        };

        let credential = self.exchange(installation_id).await?;
        tracing::info!(
            installation_id,
            expires_at = %credential.expires_at,
            "Refreshed GitHub installation token"
        );

        let token = credential.token.clone();
        *self
            .cached
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(credential);
        Ok(token)
    }

    /// Drop the cached token so the next call refreshes (e.g. after a 401).
    pub fn invalidate(&self) {
        *self
            .cached
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    fn fresh_token(&self) -> Option<InstallationToken> {
        let now = self.clock.now();
        let cached = self
            .cached
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cached
            .as_ref()
            .filter(|c| c.is_fresh(now, self.margin))
            .map(|c| c.token.clone())
    }

    async fn exchange(&self, installation_id: u64) -> Result<InstallationCredential> {
        let url = format!(
            "{}/app/installations/{installation_id}/access_tokens",
            self.api_url
        );

        let response = self
            .send_with_retry(HttpMethod::Post, &url, "installation token exchange")
            .await?;

        match response.status {
            201 | 200 => {
                let body: AccessTokenResponse = response
                    .json()
                    .map_err(|e| AuthError::Decode(e.to_string()))?;
                Ok(InstallationCredential {
                    token: InstallationToken::new(body.token),
                    expires_at: body.expires_at,
                })
            }
            status => Err(AuthError::rejected(status, response.text())),
        }
    }

    async fn discover_installation(&self) -> Result<u64> {
        let InstallationLocator::Owner(owner) = &self.locator else {
            return Err(AuthError::Decode("installation id missing".to_string()));
        };

        for kind in ["orgs", "users"] {
            let url = format!("{}/{kind}/{owner}/installation", self.api_url);
            let response = self
                .send_with_retry(HttpMethod::Get, &url, "installation lookup")
                .await?;

            match response.status {
                200 => {
                    let body: InstallationResponse = response
                        .json()
                        .map_err(|e| AuthError::Decode(e.to_string()))?;
                    tracing::debug!(owner = %owner, installation_id = body.id, "Found App installation");
                    return Ok(body.id);
                }
                404 => continue,
                status => return Err(AuthError::rejected(status, response.text())),
            }
        }

        Err(AuthError::InstallationNotFound(owner.clone()))
    }

    /// Send an App-JWT-authenticated request, retrying transient failures.
    ///
    /// Non-2xx statuses other than 5xx/429 are handed back to the caller.
    async fn send_with_retry(
        &self,
        method: HttpMethod,
        url: &str,
        label: &str,
    ) -> Result<HttpResponse> {
        let attempt = move || async move {
            let jwt = self.signer.sign(self.clock.now().timestamp())?;
            let request = HttpRequest::new(method, url)
                .header("Authorization", format!("Bearer {jwt}"))
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", "2022-11-28")
                .header("User-Agent", "vocpub");

            let response = self
                .transport
                .send(request)
                .await
                .map_err(|e| AuthError::unavailable(e.to_string()))?;

            if response.status >= 500 || response.status == 429 {
                return Err(AuthError::unavailable(format!(
                    "HTTP {}: {}",
                    response.status,
                    response.text()
                )));
            }
            Ok(response)
        };

        with_retry(
            attempt,
            &self.retry,
            AuthError::is_transient,
            |e| e.to_string(),
            label,
        )
        .await
        .map_err(|err| match err {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { attempts, last } => {
                AuthError::unavailable(format!("{label} failed after {attempts} attempts: {last}"))
            }
        })
    }
}

impl std::fmt::Debug for InstallationTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationTokenProvider")
            .field("api_url", &self.api_url)
            .field("app_id", &self.signer.app_id())
            .field("locator", &self.locator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{TEST_PRIVATE_KEY, TEST_TIMESTAMP};
    use crate::clock::FixedClock;
    use crate::http::MockTransport;
    use serde_json::json;

    const API: &str = "https://api.github.test";

    fn token_url(id: u64) -> String {
        format!("{API}/app/installations/{id}/access_tokens")
    }

    fn expires_in(secs: i64) -> String {
        DateTime::from_timestamp(TEST_TIMESTAMP + secs, 0)
            .expect("valid")
            .to_rfc3339()
    }

    fn provider(
        transport: &MockTransport,
        locator: InstallationLocator,
        clock: Arc<FixedClock>,
    ) -> InstallationTokenProvider {
        let signer = AppJwtSigner::from_pem("12345", TEST_PRIVATE_KEY).expect("valid key");
        InstallationTokenProvider::new(Arc::new(transport.clone()), API, signer, locator)
            .with_clock(clock)
            .with_retry(
                RetryConfig::new(
                    std::time::Duration::from_millis(1),
                    std::time::Duration::from_millis(2),
                    2,
                )
                .with_jitter(false),
            )
    }

    #[tokio::test]
    async fn exchanges_app_jwt_for_installation_token() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            token_url(42),
            201,
            json!({"token": "ghs_abc", "expires_at": expires_in(3600)}),
            &[],
        );
        let clock = Arc::new(FixedClock::at_epoch(TEST_TIMESTAMP));
        let provider = provider(&transport, InstallationLocator::Id(42), clock);

        let token = provider.token().await.expect("token");
        assert_eq!(token.expose(), "ghs_abc");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let auth = crate::http::header_get(&requests[0].headers, "authorization").expect("auth header");
        assert!(auth.starts_with("Bearer ey"));
    }

    /// Holds every exchange in flight for a while so callers overlap.
    #[derive(Clone)]
    struct SlowTransport {
        inner: MockTransport,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl HttpTransport for SlowTransport {
        async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, crate::http::HttpError> {
            tokio::time::sleep(self.delay).await;
            self.inner.send(request).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_a_single_refresh() {
        let transport = MockTransport::new();
        // Seeded token already sits inside the refresh margin.
        transport.push_json(
            HttpMethod::Post,
            token_url(42),
            201,
            json!({"token": "ghs_stale", "expires_at": expires_in(30)}),
            &[],
        );
        transport.push_json(
            HttpMethod::Post,
            token_url(42),
            201,
            json!({"token": "ghs_fresh", "expires_at": expires_in(3600)}),
            &[],
        );
        let slow = SlowTransport {
            inner: transport.clone(),
            delay: std::time::Duration::from_millis(50),
        };
        let clock = Arc::new(FixedClock::at_epoch(TEST_TIMESTAMP));
        let signer = AppJwtSigner::from_pem("12345", TEST_PRIVATE_KEY).expect("valid key");
        let provider = Arc::new(
            InstallationTokenProvider::new(Arc::new(slow), API, signer, InstallationLocator::Id(42))
                .with_clock(clock)
                .with_retry(RetryConfig::new(
                    std::time::Duration::from_millis(1),
                    std::time::Duration::from_millis(2),
                    0,
                )),
        );
        assert_eq!(provider.token().await.expect("seed").expose(), "ghs_stale");

        let start = Arc::new(tokio::sync::Barrier::new(10));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let provider = Arc::clone(&provider);
                let start = Arc::clone(&start);
                tokio::spawn(async move {
                    start.wait().await;
                    provider.token().await
                })
            })
            .collect();

        for handle in handles {
            let token = handle.await.expect("task").expect("token");
            assert_eq!(token.expose(), "ghs_fresh");
        }

        assert_eq!(transport.count(HttpMethod::Post, "/access_tokens"), 2);
    }

    #[tokio::test]
    async fn refreshes_when_token_nears_expiry() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            token_url(42),
            201,
            json!({"token": "ghs_first", "expires_at": expires_in(3600)}),
            &[],
        );
        transport.push_json(
            HttpMethod::Post,
            token_url(42),
            201,
            json!({"token": "ghs_second", "expires_at": expires_in(7200)}),
            &[],
        );
        let clock = Arc::new(FixedClock::at_epoch(TEST_TIMESTAMP));
        let provider = provider(&transport, InstallationLocator::Id(42), Arc::clone(&clock));

        assert_eq!(provider.token().await.expect("token").expose(), "ghs_first");
        clock.advance(Duration::seconds(3000));
        assert_eq!(provider.token().await.expect("cached").expose(), "ghs_first");

        // Inside the 60 second margin now.
        clock.advance(Duration::seconds(550));
        assert_eq!(provider.token().await.expect("refreshed").expose(), "ghs_second");
        assert_eq!(transport.count(HttpMethod::Post, "/access_tokens"), 2);
    }

    #[tokio::test]
    async fn discovers_installation_with_user_fallback() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            format!("{API}/orgs/alice/installation"),
            404,
            json!({"message": "Not Found"}),
            &[],
        );
        transport.push_json(
            HttpMethod::Get,
            format!("{API}/users/alice/installation"),
            200,
            json!({"id": 7}),
            &[],
        );
        transport.push_json(
            HttpMethod::Post,
            token_url(7),
            201,
            json!({"token": "ghs_user", "expires_at": expires_in(3600)}),
            &[],
        );
        let clock = Arc::new(FixedClock::at_epoch(TEST_TIMESTAMP));
        let provider = provider(&transport, InstallationLocator::Owner("alice".into()), clock);

        assert_eq!(provider.token().await.expect("token").expose(), "ghs_user");
    }

    #[tokio::test]
    async fn missing_installation_is_an_auth_error() {
        let transport = MockTransport::new();
        for kind in ["orgs", "users"] {
            transport.push_json(
                HttpMethod::Get,
                format!("{API}/{kind}/ghost/installation"),
                404,
                json!({"message": "Not Found"}),
                &[],
            );
        }
        let clock = Arc::new(FixedClock::at_epoch(TEST_TIMESTAMP));
        let provider = provider(&transport, InstallationLocator::Owner("ghost".into()), clock);

        let err = provider.token().await.expect_err("should fail");
        assert!(matches!(err, AuthError::InstallationNotFound(owner) if owner == "ghost"));
    }

    #[tokio::test]
    async fn rejected_exchange_is_not_retried() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            token_url(42),
            401,
            json!({"message": "A JSON web token could not be decoded"}),
            &[],
        );
        let clock = Arc::new(FixedClock::at_epoch(TEST_TIMESTAMP));
        let provider = provider(&transport, InstallationLocator::Id(42), clock);

        let err = provider.token().await.expect_err("should fail");
        assert!(matches!(err, AuthError::Rejected { status: 401, .. }));
        assert_eq!(transport.count(HttpMethod::Post, "/access_tokens"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_exchange_failures_are_retried() {
        let transport = MockTransport::new();
        transport.push_transport_error(HttpMethod::Post, token_url(42), "connection reset");
        transport.push_json(HttpMethod::Post, token_url(42), 502, json!({}), &[]);
        transport.push_json(
            HttpMethod::Post,
            token_url(42),
            201,
            json!({"token": "ghs_retry", "expires_at": expires_in(3600)}),
            &[],
        );
        let clock = Arc::new(FixedClock::at_epoch(TEST_TIMESTAMP));
        let provider = provider(&transport, InstallationLocator::Id(42), clock);

        assert_eq!(provider.token().await.expect("token").expose(), "ghs_retry");
        assert_eq!(transport.count(HttpMethod::Post, "/access_tokens"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_outage_becomes_unavailable() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.push_json(HttpMethod::Post, token_url(42), 503, json!({}), &[]);
        }
        let clock = Arc::new(FixedClock::at_epoch(TEST_TIMESTAMP));
        let provider = provider(&transport, InstallationLocator::Id(42), clock);

        let err = provider.token().await.expect_err("should fail");
        assert!(matches!(err, AuthError::Unavailable(_)));
    }
}
