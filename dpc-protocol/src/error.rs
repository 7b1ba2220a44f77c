//! Error types for the DPC wire codec

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding DPC queries
#[derive(Debug, Error)]
pub enum Error {
    #[error("query name has {0} labels, expected 1-3")]
    LabelCount(usize),

    #[error("invalid base32 payload: {0:?}")]
    Payload(String),

    #[error("invalid base64 record text: {0:?}")]
    Reply(String),

    #[error("invalid base-36 counter: {0:?}")]
    Counter(String),
}
