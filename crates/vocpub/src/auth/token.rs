use chrono::{DateTime, Duration, Utc};

/// An installation access token. `Debug` never shows the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct InstallationToken(String);

impl InstallationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authorization` header only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InstallationToken(<redacted>)")
    }
}

/// A token together with its expiry.
#[derive(Debug, Clone)]
pub struct InstallationCredential {
    pub token: InstallationToken,
    pub expires_at: DateTime<Utc>,
}

impl InstallationCredential {
    /// Usable at `now` with at least `margin` to spare.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at - margin > now
    }
}
