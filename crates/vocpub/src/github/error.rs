//! Error types for GitHub API operations.

use std::time::Duration;

use thiserror::Error;

use crate::auth::AuthError;
use crate::http::HttpResponse;

/// Errors that can occur when interacting with the GitHub API.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// Connection-level failure.
    #[error("HTTP error: {0}")]
    Transport(String),

    /// Primary or secondary rate limit.
    #[error("Rate limited ({status}): {message}")]
    RateLimited {
        status: u16,
        retry_after: Option<Duration>,
        message: String,
    },

    /// Missing repository, ref or object.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The installation lacks permission.
    #[error("Forbidden ({status}): {message}")]
    Forbidden { status: u16, message: String },

    /// Validation failure or conflict (409/422).
    #[error("Unprocessable ({status}): {message}")]
    Unprocessable { status: u16, message: String },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Could not obtain an installation token.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A transient failure outlived the retry budget.
    #[error("Gave up after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: String },
}

impl GitHubError {
    /// Classify a non-success response.
    pub fn from_response(response: &HttpResponse) -> Self {
        let status = response.status;
        let message = response_message(response);
        let retry_after = response
            .header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        match status {
            429 => Self::RateLimited {
                status,
                retry_after,
                message,
            },
            403 if retry_after.is_some()
                || response.header("x-ratelimit-remaining") == Some("0")
                || message.to_ascii_lowercase().contains("rate limit") =>
            {
                Self::RateLimited {
                    status,
                    retry_after,
                    message,
                }
            }
            401 | 403 => Self::Forbidden { status, message },
            404 => Self::NotFound(message),
            409 | 422 => Self::Unprocessable { status, message },
            500..=599 => Self::Server { status, message },
            _ => Self::Api { status, message },
        }
    }

    /// Worth retrying with backoff.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[inline]
    pub fn is_unprocessable(&self) -> bool {
        matches!(self, Self::Unprocessable { .. })
    }
}

/// GitHub error bodies are `{"message": "...", ...}`; fall back to the raw text.
pub(crate) fn response_message(response: &HttpResponse) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }

    response
        .json::<ErrorBody>()
        .map(|b| b.message)
        .unwrap_or_else(|_| response.text())
}

/// First line of an error, for progress output.
pub fn short_error_message(err: &impl std::fmt::Display) -> String {
    let full = err.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

pub type Result<T> = std::result::Result<T, GitHubError>;
