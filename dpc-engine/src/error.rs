//! Error types for the tunnel engines

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving or driving the tunnel
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Wire codec error
    #[error("codec error: {0}")]
    Codec(#[from] dpc_protocol::Error),

    /// DNS message build/parse error
    #[error("DNS error: {0}")]
    Dns(String),

    /// A query received no reply or an unusable one
    #[error("querying for {name:?}: {reason}")]
    Query { name: String, reason: String },

    /// Handshake with the server failed
    #[error("handshake error: {0}")]
    Handshake(String),

    /// A data query named a session the server no longer has
    #[error("unknown ID")]
    UnknownId,

    /// New-session timestamp outside the accepted clock window
    #[error("timestamp difference is too big ({0:?} > {1:?})")]
    ClockSkew(std::time::Duration, std::time::Duration),

    /// New-session timestamp did not parse
    #[error("parsing timestamp: {0:?}")]
    Timestamp(String),

    /// Upstream TCP failure
    #[error("upstream error: {0}")]
    Upstream(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
