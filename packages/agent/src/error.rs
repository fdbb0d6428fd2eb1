//! Typed error taxonomy for the agent's four subsystems.
//!
//! Each concern gets its own enum because each is handled at a different
//! layer (connection, adapter apply pipeline, exec pipeline, persistence)
//! and a single flat error type would force every layer to match arms it
//! can never produce. `ModeDenied` is deliberately absent here: per the
//! dispatcher's contract it is surfaced as the `outcome` of a reply, never
//! as an `Err` that closes the connection.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to dial {url}: {source}")]
    DialFailed {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("write failed: {0}")]
    WriteFailed(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("read failed: {0}")]
    ReadFailed(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("malformed frame: {0}")]
    FramingError(String),
    #[error("no frame received for {secs}s, treating link as dead")]
    KeepaliveTimeout { secs: u64 },
}

#[derive(Debug, Error)]
#[error("auth rejected: {reason}{}", if *.permanent { " (permanent)" } else { "" })]
pub struct AuthError {
    pub reason: String,
    pub permanent: bool,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unrecognized message tag: {0}")]
    UnknownTag(String),
    #[error("malformed payload for {msg_type}: {source}")]
    MalformedPayload {
        msg_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to read running config: {0}")]
    ReadFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("validation failed: {0}")]
    ValidateFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("apply failed: {0}")]
    ApplyFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("rollback failed: {0}")]
    RollbackFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("no adapter registered for section {0:?}")]
    UnknownSection(ngfw_protocol::ConfigSection),
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command not allowlisted: {0}")]
    Disallowed(String),
    #[error("command path must be a bare basename: {0}")]
    DisallowedPath(String),
    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[source] std::io::Error),
    #[error("command timed out after {0}ms")]
    TimedOut(u64),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("corrupt file preserved at {preserved_as}: {source}")]
    Corrupt {
        preserved_as: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),
}
