//! Limit-aware request pacing.
//!
//! Two mechanisms share one [`ApiRateLimiter`]:
//!
//! - a proactive requests-per-second pacer (`governor`), and
//! - a quota tracker fed from GitHub's `x-ratelimit-*` and `retry-after`
//!   response headers. When the quota is spent, every caller of
//!   [`ApiRateLimiter::acquire`] waits until the reset instant.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::http::{HttpHeaders, header_get};

type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// GitHub allows 5000 requests/hour per installation; 10/sec leaves room for bursts.
pub const GITHUB_DEFAULT_RPS: u32 = 10;

const UNKNOWN: u64 = u64::MAX;

/// Rate limit information parsed from a single response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    /// Secondary-limit back-off requested by the server.
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Extract rate limit info from GitHub response headers.
    ///
    /// Returns `None` when the response carries no rate limit headers at all.
    pub fn from_headers(headers: &HttpHeaders) -> Option<Self> {
        let number = |name: &str| header_get(headers, name).and_then(|v| v.trim().parse::<u64>().ok());

        let info = Self {
            limit: number("x-ratelimit-limit"),
            remaining: number("x-ratelimit-remaining"),
            reset_at: header_get(headers, "x-ratelimit-reset")
                .and_then(|v| v.trim().parse::<i64>().ok())
                .and_then(|epoch| DateTime::from_timestamp(epoch, 0)),
            retry_after: number("retry-after").map(Duration::from_secs),
        };

        if info == Self::default() {
            None
        } else {
            Some(info)
        }
    }

    /// True when the primary quota is used up.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Point-in-time view of the shared quota, for logging.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct QuotaState {
    limit: AtomicU64,
    remaining: AtomicU64,
    reset_at_ms: AtomicI64,
    paused_until_ms: AtomicI64,
}

impl Default for QuotaState {
    fn default() -> Self {
        Self {
            limit: AtomicU64::new(UNKNOWN),
            remaining: AtomicU64::new(UNKNOWN),
            reset_at_ms: AtomicI64::new(0),
            paused_until_ms: AtomicI64::new(0),
        }
    }
}

/// Shared pacer and quota tracker for one GitHub installation.
///
/// Cloning is cheap; clones share both the pacer and the quota counter.
///
/// ```ignore
/// let limiter = ApiRateLimiter::new(GITHUB_DEFAULT_RPS);
///
/// limiter.acquire().await;
/// let response = transport.send(request).await?;
/// if let Some(info) = RateLimitInfo::from_headers(&response.headers) {
///     limiter.observe(&info);
/// }
/// ```
#[derive(Clone)]
pub struct ApiRateLimiter {
    pacer: Arc<GovernorRateLimiter>,
    quota: Arc<QuotaState>,
    clock: Arc<dyn Clock>,
}

impl ApiRateLimiter {
    /// Create a limiter allowing `requests_per_second` (0 is treated as 1).
    pub fn new(requests_per_second: u32) -> Self {
        Self::with_clock(requests_per_second, Arc::new(SystemClock))
    }

    pub fn with_clock(requests_per_second: u32, clock: Arc<dyn Clock>) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            pacer: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            quota: Arc::new(QuotaState::default()),
            clock,
        }
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        if let Some(delay) = self.pending_delay() {
            tracing::warn!(
                wait_secs = delay.as_secs(),
                "GitHub rate limit reached, waiting for reset"
            );
            tokio::time::sleep(delay).await;
            // The window has rolled over; the next response refreshes the real numbers.
            self.quota.remaining.store(UNKNOWN, Ordering::SeqCst);
            self.quota.paused_until_ms.store(0, Ordering::SeqCst);
        }

        self.pacer.until_ready().await;

        let _ = self
            .quota
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| match r {
                UNKNOWN | 0 => None,
                n => Some(n - 1),
            });
    }

    /// How long a caller would currently have to wait, if at all.
    #[must_use]
    pub fn pending_delay(&self) -> Option<Duration> {
        let now = self.clock.now().timestamp_millis();
        let mut until = self.quota.paused_until_ms.load(Ordering::SeqCst);

        let reset = self.quota.reset_at_ms.load(Ordering::SeqCst);
        if self.quota.remaining.load(Ordering::SeqCst) == 0 && reset > now {
            until = until.max(reset);
        }

        if until > now {
            u64::try_from(until - now).ok().map(Duration::from_millis)
        } else {
            None
        }
    }

    /// Record the rate limit headers of a response.
    pub fn observe(&self, info: &RateLimitInfo) {
        if let Some(limit) = info.limit {
            self.quota.limit.store(limit, Ordering::SeqCst);
        }
        if let Some(remaining) = info.remaining {
            self.quota.remaining.store(remaining, Ordering::SeqCst);
        }
        if let Some(reset_at) = info.reset_at {
            self.quota
                .reset_at_ms
                .store(reset_at.timestamp_millis(), Ordering::SeqCst);
        }
        if let Some(retry_after) = info.retry_after {
            let millis = i64::try_from(retry_after.as_millis()).unwrap_or(i64::MAX);
            let until = self.clock.now().timestamp_millis().saturating_add(millis);
            self.quota.paused_until_ms.fetch_max(until, Ordering::SeqCst);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> QuotaSnapshot {
        let known = |v: u64| (v != UNKNOWN).then_some(v);
        let reset = self.quota.reset_at_ms.load(Ordering::SeqCst);
        QuotaSnapshot {
            limit: known(self.quota.limit.load(Ordering::SeqCst)),
            remaining: known(self.quota.remaining.load(Ordering::SeqCst)),
            reset_at: (reset > 0)
                .then(|| DateTime::from_timestamp_millis(reset))
                .flatten(),
        }
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter")
            .field("quota", &self.snapshot())
            .finish()
    }
}
