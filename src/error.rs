//! Error types for the reconciliation engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failures while retrieving the upstream proxy list
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The feed answered with a non-success status
    #[error("feed returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// No JSON object could be located in the response body
    #[error("no JSON object found in response")]
    MissingPayload,

    /// The located payload is not a valid proxy list envelope
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failures of the reconciliation store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored item could not be decoded back into a record
    #[error("corrupt item {key}: {message}")]
    Corrupt { key: String, message: String },

    /// Table bootstrap did not complete
    #[error("table {table} not ready: {message}")]
    Bootstrap { table: String, message: String },

    /// Backend-specific failure
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),

    /// Missing or invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The scheduler was stopped through its cancellation token
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
