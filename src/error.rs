//! Error types for background-fetch
//!
//! This module provides the error taxonomy of the library:
//! - [`TransportError`] - durable, codec-agnostic encoding of a failed or cancelled transfer
//! - [`StoreError`] - persisted key/value store failures
//! - [`Error`] - the crate-wide error returned by fallible operations
//!
//! Recoverable errors never reach the OS-facing entry point. They are absorbed at the
//! component boundary and turned into one of the three coordinator results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for background-fetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for background-fetch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetch_deadline")
        key: Option<String>,
    },

    /// Persisted store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A transfer failed or was cancelled
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A payload was retrieved but did not match the expected document shape
    #[error("decode error: {0}")]
    Decode(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network client error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Invalid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The session event loop is no longer running
    #[error("session closed: the event loop is no longer running")]
    SessionClosed,
}

impl Error {
    /// Get the machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Store(e) => match e {
                StoreError::ConnectionFailed(_) => "store_connection_failed",
                StoreError::MigrationFailed(_) => "store_migration_failed",
                StoreError::QueryFailed(_) => "store_query_failed",
            },
            Error::Sqlx(_) => "database_error",
            Error::Transport(e) if e.is_cancelled() => "cancelled",
            Error::Transport(_) => "transport_error",
            Error::Decode(_) => "decode_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Network(_) => "network_error",
            Error::InvalidUrl(_) => "invalid_url",
            Error::SessionClosed => "session_closed",
        }
    }
}

/// Persisted store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open the backing store
    #[error("failed to connect to store: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Read or write failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Terminal transport error of a task
///
/// Stored verbatim in the task registry, so it only carries plain data: an error
/// domain, a numeric code and an optional description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{domain} error {code}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct TransportError {
    /// Error domain ([`TransportError::TRANSPORT_DOMAIN`] or [`TransportError::FILESYSTEM_DOMAIN`])
    pub domain: String,
    /// Domain-specific numeric code
    pub code: i64,
    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TransportError {
    /// Domain for errors raised by the network stack
    pub const TRANSPORT_DOMAIN: &'static str = "transport";
    /// Domain for temp-file move and cleanup failures
    pub const FILESYSTEM_DOMAIN: &'static str = "filesystem";

    /// Unclassified transport failure
    pub const UNKNOWN: i64 = -1;
    /// The transfer was cancelled
    pub const CANCELLED: i64 = -999;
    /// The request timed out
    pub const TIMED_OUT: i64 = -1001;
    /// The host could not be reached
    pub const CANNOT_CONNECT: i64 = -1004;
    /// The connection dropped mid-transfer
    pub const NETWORK_LOST: i64 = -1005;
    /// The server sent a response the transport could not handle
    pub const BAD_SERVER_RESPONSE: i64 = -1011;

    /// Create a new transport error
    pub fn new(domain: impl Into<String>, code: i64, message: Option<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message,
        }
    }

    /// Error in the transport domain
    pub fn transport(code: i64, message: impl Into<String>) -> Self {
        Self::new(Self::TRANSPORT_DOMAIN, code, Some(message.into()))
    }

    /// Cancellation error delivered when a transfer is cancelled
    pub fn cancelled() -> Self {
        Self::new(Self::TRANSPORT_DOMAIN, Self::CANCELLED, Some("cancelled".into()))
    }

    /// Filesystem-domain error built from an I/O failure
    pub fn filesystem(error: &std::io::Error) -> Self {
        Self::new(
            Self::FILESYSTEM_DOMAIN,
            error.raw_os_error().map(i64::from).unwrap_or(Self::UNKNOWN),
            Some(error.to_string()),
        )
    }

    /// Whether this error reports a cancelled transfer
    pub fn is_cancelled(&self) -> bool {
        self.domain == Self::TRANSPORT_DOMAIN && self.code == Self::CANCELLED
    }
}

impl From<&reqwest::Error> for TransportError {
    fn from(error: &reqwest::Error) -> Self {
        let code = if error.is_timeout() {
            Self::TIMED_OUT
        } else if error.is_connect() {
            Self::CANNOT_CONNECT
        } else if error.is_body() || error.is_decode() {
            Self::NETWORK_LOST
        } else if error.is_redirect() {
            Self::BAD_SERVER_RESPONSE
        } else {
            Self::UNKNOWN
        };
        Self::transport(code, error.to_string())
    }
}
