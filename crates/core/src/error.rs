//! Error types for the core library.

use thiserror::Error;

/// Main error type for the core library.
#[derive(Error, Debug)]
pub enum Error {
    /// Backend platform is not configured (missing service URL or key)
    #[error("chat backend is not configured")]
    NotConfigured,

    /// Authentication error
    #[error("authentication error: {0}")]
    Auth(String),

    /// Query error from the remote data store
    #[error("query error: {0}")]
    Query(String),

    /// HTTP transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Object storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Realtime channel error
    #[error("realtime error: {0}")]
    Realtime(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Chat error
    #[error("chat error: {0}")]
    Chat(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
