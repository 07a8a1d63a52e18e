//! GitHub App authentication.
//!
//! An App JWT (signed with the App's private key) is exchanged for a
//! short-lived installation access token. [`InstallationTokenProvider`] caches
//! that token and refreshes it before expiry, one refresh at a time.

mod jwt;
mod provider;
mod token;

use thiserror::Error;

pub use jwt::{AppJwtSigner, normalize_private_key};
pub use provider::{DEFAULT_REFRESH_MARGIN_SECS, InstallationLocator, InstallationTokenProvider};
pub use token::{InstallationCredential, InstallationToken};

/// Authentication failures. Any of these aborts a publish run.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The private key could not be parsed.
    #[error("invalid GitHub App private key: {0}")]
    InvalidKey(String),

    /// Signing the App JWT failed.
    #[error("failed to sign GitHub App JWT: {0}")]
    Signing(String),

    /// GitHub refused the App JWT or the token exchange.
    #[error("GitHub rejected the App credentials ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The App is not installed on the owner.
    #[error("GitHub App is not installed for '{0}'")]
    InstallationNotFound(String),

    /// GitHub could not be reached (or kept failing) while authenticating.
    #[error("GitHub unavailable during authentication: {0}")]
    Unavailable(String),

    /// The response could not be understood.
    #[error("unexpected authentication response: {0}")]
    Decode(String),
}

impl AuthError {
    #[inline]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    #[inline]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Whether a retry could succeed.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
