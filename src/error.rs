//! Error types for tiktok-dl
//!
//! Two layers of errors exist:
//! - [`Error`] — top-level errors returned by the pipeline orchestrator.
//!   The only run-fatal variant is [`Error::TargetResolution`].
//! - [`FetchError`] — per-record failures produced by the Fetcher Adapter.
//!   These never abort a run; they are retried when retryable and recorded
//!   as `Failed` outcomes otherwise.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for tiktok-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tiktok-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The settings key that caused the error (e.g., "concurrency")
        key: Option<String>,
    },

    /// No supplied target could be resolved — the run has nothing to do
    #[error("target resolution failed: {0}")]
    TargetResolution(String),

    /// Per-record fetch failure surfaced at the top level
    /// (only when a caller invokes the Fetcher Adapter directly)
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The pipeline's single-run state machine has already left `Idle`
    #[error("pipeline already ran: create a new pipeline for another run")]
    AlreadyRan,
}

/// Classification of a [`FetchError`]
///
/// The Fetcher Adapter is the sole translator from transport-level failures
/// into this taxonomy; the rest of the pipeline reasons only about
/// [`FetchError::retryable`] (and [`FetchErrorKind::RateLimited`], which
/// additionally arms the pool-wide backoff gate).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// The record or target does not exist on the remote platform
    NotFound,
    /// The remote platform is throttling us
    RateLimited,
    /// Transport failure (timeout, connect error, transfer interrupted)
    NetworkError,
    /// The record cannot be handled (no media URL, unsupported scheme, ...)
    Unsupported,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FetchErrorKind::NotFound => "not_found",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::NetworkError => "network_error",
            FetchErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{s}")
    }
}

/// A per-record failure from the Fetcher Adapter
#[derive(Clone, Debug, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    /// Failure classification
    pub kind: FetchErrorKind,
    /// Whether a retry can reasonably be expected to succeed
    pub retryable: bool,
    /// Human-readable description of the failure
    pub message: String,
}

impl FetchError {
    /// A missing record or target (permanent)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::NotFound,
            retryable: false,
            message: message.into(),
        }
    }

    /// Remote throttling (retryable; also triggers the pool-wide backoff hint)
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::RateLimited,
            retryable: true,
            message: message.into(),
        }
    }

    /// A transient transport failure (retryable)
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::NetworkError,
            retryable: true,
            message: message.into(),
        }
    }

    /// An unprocessable record (permanent)
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Unsupported,
            retryable: false,
            message: message.into(),
        }
    }

    /// Translate a local I/O failure into the fetch taxonomy
    ///
    /// Connection-flavored kinds are retryable; everything else (disk full,
    /// permission denied, ...) is permanent.
    pub fn from_io(context: &str, e: &std::io::Error) -> Self {
        let retryable = matches!(
            e.kind(),
            std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::Interrupted
        );
        Self {
            kind: FetchErrorKind::NetworkError,
            retryable,
            message: format!("{context}: {e}"),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_conventional_retryability() {
        assert!(!FetchError::not_found("gone").retryable);
        assert!(FetchError::rate_limited("429").retryable);
        assert!(FetchError::network("timeout").retryable);
        assert!(!FetchError::unsupported("no media url").retryable);
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = FetchError::rate_limited("HTTP 429 from platform");
        assert_eq!(err.to_string(), "rate_limited: HTTP 429 from platform");
    }

    #[test]
    fn from_io_classifies_connection_kinds_as_retryable() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout");
        assert!(FetchError::from_io("writing media", &timeout).retryable);

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(FetchError::from_io("writing media", &reset).retryable);
    }

    #[test]
    fn from_io_classifies_disk_errors_as_permanent() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = FetchError::from_io("writing media", &denied);
        assert!(!err.retryable, "local disk errors need user action");
        assert_eq!(err.kind, FetchErrorKind::NetworkError);
        assert!(err.message.contains("writing media"));
    }

    #[test]
    fn fetch_error_converts_into_top_level_error() {
        let err: Error = FetchError::not_found("video 42").into();
        assert!(matches!(err, Error::Fetch(_)));
        assert!(err.to_string().contains("video 42"));
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&FetchErrorKind::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
        let back: FetchErrorKind = serde_json::from_str("\"network_error\"").unwrap();
        assert_eq!(back, FetchErrorKind::NetworkError);
    }
}
