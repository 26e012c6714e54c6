use thiserror::Error;

/// The closed failure taxonomy surfaced by every public API in this crate.
/// Drivers normalize backend-native failures into these kinds; nothing else
/// crosses the crate boundary.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Caller contract violation: malformed location string, missing key,
    /// invalid metadata. Not retryable.
    #[error("interface: {0}")]
    Interface(String),

    /// Requested key, version, or log entry absent from every consulted
    /// location.
    #[error("not found: {0}")]
    NotFound(String),

    /// A create conflicted with an existing live record.
    #[error("exists: {0}")]
    Exists(String),

    /// Backend returned a malformed response, or a structural invariant was
    /// violated. Indicates a bug or corruption.
    #[error("data error: {0}")]
    Data(String),

    /// Unclassified failure.
    #[error("error: {0}")]
    Internal(String),
}

pub type CResult<T> = std::result::Result<T, Error>;
