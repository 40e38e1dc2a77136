//! Error types for the Nextcloud auth crate.
//!
//! Every fallible operation surfaces [`AuthError`]. The three profile
//! variants are kept distinct so callers can tell a provider outage
//! ([`AuthError::ProfileFetch`]) from a garbled body
//! ([`AuthError::ProfileParse`]) and from a well-formed body that lacks the
//! fields we need ([`AuthError::ProfileShape`]).

use crate::transport::TransportError;

/// Unified error type for the Nextcloud auth crate.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The profile endpoint could not be reached or answered with a
    /// non-success status. The transport failure is kept as the source.
    #[error("Failed to fetch user profile")]
    ProfileFetch {
        /// The underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The profile endpoint answered with a body that is not JSON.
    #[error("Failed to parse user profile")]
    ProfileParse,

    /// The profile body parsed as JSON but `ocs.data` or one of its
    /// required fields is missing or has the wrong type.
    #[error("Unexpected user profile shape: missing or invalid {field}")]
    ProfileShape {
        /// Dotted path of the offending field (e.g. `ocs.data.id`).
        field: String,
    },

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The authorization code exchange or refresh grant was rejected by the
    /// token endpoint.
    #[error("invalid grant: {reason}")]
    InvalidGrant {
        /// Explanation from the authorization server.
        reason: String,
    },

    /// The authorization flow failed for a non-specific reason (state
    /// mismatch, provider-reported error on the redirect, ...).
    #[error("authentication flow failed: {reason}")]
    FlowFailed {
        /// Details about why the flow failed.
        reason: String,
    },

    /// The verify callback declined the authenticated profile.
    #[error("verification rejected: {reason}")]
    Verification {
        /// Why the host application rejected the user.
        reason: String,
    },

    /// The local callback listener timed out waiting for the redirect.
    #[error("callback timed out after {timeout_secs} seconds")]
    CallbackTimeout {
        /// How many seconds we waited before giving up.
        timeout_secs: u64,
    },

    /// An HTTP request to the token endpoint failed.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (callback listener, config file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl AuthError {
    /// Shorthand for an [`AuthError::ProfileShape`] on the given field path.
    pub(crate) fn shape(field: impl Into<String>) -> Self {
        Self::ProfileShape {
            field: field.into(),
        }
    }

    /// Shorthand for an [`AuthError::InvalidConfig`].
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;
